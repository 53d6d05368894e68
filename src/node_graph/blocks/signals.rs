use super::*;

const INPUT: usize = 0;
const OUTPUT: usize = 1;

pub fn get_block_types() -> Vec<BlockInfo> {
    vec![
        BlockInfo {
            type_name: "value".into(),
            name_in_ui: "Value".into(),
            description: Some("Constant value set from the UI.".into()),
            category: Some("Signal".into()),
            factory: ValueBlock::create,
        },
        BlockInfo {
            type_name: "threshold".into(),
            name_in_ui: "Threshold".into(),
            description: Some("Outputs 1 while the input is above the trigger threshold.".into()),
            category: Some("Signal".into()),
            factory: ThresholdBlock::create,
        },
        BlockInfo {
            type_name: "trigger".into(),
            name_in_ui: "Trigger".into(),
            description: Some("Sends a short impulse each time the input turns on.".into()),
            category: Some("Signal".into()),
            factory: TriggerBlock::create,
        },
    ]
}

#[derive(Debug, Default)]
pub struct ValueBlock {
    value: f64,
}

impl ValueBlock {
    const OUTPUT: usize = 0;

    pub fn create(builder: &mut BlockBuilder) -> Box<dyn Block> {
        builder.create_output("Output");
        Box::new(Self::default())
    }
}

impl Block for ValueBlock {
    fn state(&self) -> Value {
        json!({ "value": self.value })
    }

    fn set_state(&mut self, ctx: &mut BlockContext<'_>, state: &Value) {
        if let Some(value) = read_f64(state, "value") {
            self.value = value.clamp(0.0, 1.0);
            ctx.set_value(Self::OUTPUT, self.value);
        }
    }
}

#[derive(Debug, Default)]
pub struct ThresholdBlock;

impl ThresholdBlock {
    pub fn create(builder: &mut BlockBuilder) -> Box<dyn Block> {
        let input = builder.create_input("Input");
        let output = builder.create_output("Output");
        builder.enable_impulse_detection(input);
        builder.share_active_state(output, input);
        Box::new(Self)
    }
}

impl Block for ThresholdBlock {
    fn on_node_event(&mut self, ctx: &mut BlockContext<'_>, node: usize, event: NodeEvent) {
        if node != INPUT {
            return;
        }
        match event {
            NodeEvent::ImpulseBegin => ctx.set_value(OUTPUT, 1.0),
            NodeEvent::ImpulseEnd => ctx.set_value(OUTPUT, 0.0),
            _ => {}
        }
    }
}

#[derive(Debug, Default)]
pub struct TriggerBlock {
    count: u64,
}

impl TriggerBlock {
    pub fn create(builder: &mut BlockBuilder) -> Box<dyn Block> {
        let input = builder.create_input("Input");
        builder.create_output("Impulse");
        builder.enable_impulse_detection(input);
        Box::new(Self::default())
    }
}

impl Block for TriggerBlock {
    fn on_node_event(&mut self, ctx: &mut BlockContext<'_>, node: usize, event: NodeEvent) {
        if node == INPUT && event == NodeEvent::ImpulseBegin {
            self.count += 1;
            ctx.send_impulse(OUTPUT);
        }
    }

    fn state(&self) -> Value {
        json!({ "count": self.count })
    }

    fn set_state(&mut self, _ctx: &mut BlockContext<'_>, state: &Value) {
        if let Some(count) = state.get("count").and_then(Value::as_u64) {
            self.count = count;
        }
    }
}
