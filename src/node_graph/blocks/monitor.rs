use super::*;

pub fn get_block_types() -> Vec<BlockInfo> {
    vec![BlockInfo {
        type_name: "monitor".into(),
        name_in_ui: "Monitor".into(),
        description: Some(
            "End of a chain. Requests a matrix size and counts incoming updates.".into(),
        ),
        category: Some("Output".into()),
        factory: MonitorBlock::create,
    }]
}

#[derive(Debug)]
pub struct MonitorBlock {
    size: Size,
    removable: bool,
    updates: u64,
}

impl MonitorBlock {
    const INPUT: usize = 0;

    pub fn create(builder: &mut BlockBuilder) -> Box<dyn Block> {
        builder.create_input("Input");
        Box::new(Self {
            size: Size::default(),
            removable: true,
            updates: 0,
        })
    }
}

impl Block for MonitorBlock {
    fn on_node_event(&mut self, _ctx: &mut BlockContext<'_>, node: usize, event: NodeEvent) {
        if node == Self::INPUT && event == NodeEvent::DataChanged {
            self.updates += 1;
        }
    }

    fn may_be_removed(&self) -> bool {
        self.removable
    }

    fn state(&self) -> Value {
        json!({
            "width": self.size.width,
            "height": self.size.height,
            "removable": self.removable,
            "updates": self.updates,
        })
    }

    fn set_state(&mut self, ctx: &mut BlockContext<'_>, state: &Value) {
        let width = state.get("width").and_then(Value::as_u64);
        let height = state.get("height").and_then(Value::as_u64);
        if let (Some(width), Some(height)) = (width, height) {
            let size = Size::new(width as usize, height as usize);
            if ctx.set_requested_size(Self::INPUT, size) {
                self.size = size;
            }
        }
        if let Some(removable) = state.get("removable").and_then(Value::as_bool) {
            self.removable = removable;
        }
        if let Some(active) = state.get("active").and_then(Value::as_bool) {
            ctx.set_active(Self::INPUT, active);
        }
    }
}
