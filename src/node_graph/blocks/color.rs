use super::*;
use crate::node_graph::color::Hsv;

pub fn get_block_types() -> Vec<BlockInfo> {
    vec![
        BlockInfo {
            type_name: "color".into(),
            name_in_ui: "Color".into(),
            description: Some("Uniform HSV color at the size requested downstream.".into()),
            category: Some("Color".into()),
            factory: ColorBlock::create,
        },
        BlockInfo {
            type_name: "dimmer".into(),
            name_in_ui: "Dimmer".into(),
            description: Some("Scales the brightness of a color by an intensity input.".into()),
            category: Some("Color".into()),
            factory: DimmerBlock::create,
        },
    ]
}

#[derive(Debug, Default)]
pub struct ColorBlock {
    color: Hsv,
}

impl ColorBlock {
    const OUTPUT: usize = 0;

    pub fn create(builder: &mut BlockBuilder) -> Box<dyn Block> {
        builder.create_output("Output");
        Box::new(Self::default())
    }

    fn write(&self, ctx: &mut BlockContext<'_>) {
        let size = ctx.requested_size(Self::OUTPUT);
        let Hsv { h, s, v } = self.color;
        ctx.modify_data(Self::OUTPUT, |data| {
            data.rescale_to(size.width, size.height);
            data.set_hsv(h, s, v);
        });
    }
}

impl Block for ColorBlock {
    fn on_node_event(&mut self, ctx: &mut BlockContext<'_>, node: usize, event: NodeEvent) {
        if node == Self::OUTPUT && event == NodeEvent::RequestedSizeChanged {
            self.write(ctx);
        }
    }

    fn state(&self) -> Value {
        json!({ "h": self.color.h, "s": self.color.s, "v": self.color.v })
    }

    fn set_state(&mut self, ctx: &mut BlockContext<'_>, state: &Value) {
        let current = self.color;
        self.color = Hsv::new(
            read_f64(state, "h").unwrap_or(current.h).rem_euclid(1.0),
            read_f64(state, "s").unwrap_or(current.s).clamp(0.0, 1.0),
            read_f64(state, "v").unwrap_or(current.v).clamp(0.0, 1.0),
        );
        self.write(ctx);
    }
}

/// Output follows the color input with its brightness multiplied by the
/// intensity input. Requests the color input at the output's negotiated size.
#[derive(Debug, Default)]
pub struct DimmerBlock;

impl DimmerBlock {
    const COLOR: usize = 0;
    const INTENSITY: usize = 1;
    const OUTPUT: usize = 2;

    pub fn create(builder: &mut BlockBuilder) -> Box<dyn Block> {
        builder.create_input("Color");
        builder.create_input("Intensity");
        builder.create_output("Output");
        builder.share_requested_size(Self::OUTPUT, Self::COLOR);
        builder.share_active_state(Self::OUTPUT, Self::COLOR);
        builder.share_active_state(Self::OUTPUT, Self::INTENSITY);
        Box::new(Self)
    }

    fn update(&self, ctx: &mut BlockContext<'_>) {
        let intensity = ctx.value(Self::INTENSITY);
        let Some(color) = ctx.data(Self::COLOR).cloned() else {
            return;
        };
        ctx.modify_data(Self::OUTPUT, |out| {
            if color.is_scalar() {
                out.rescale_to(color.width(), color.height());
                out.set_value(color.value() * intensity);
                return;
            }
            let mut grid = color.hsv().clone();
            for x in 0..grid.width() {
                for y in 0..grid.height() {
                    grid.at_mut(x, y).v *= intensity;
                }
            }
            out.set_hsv_matrix(grid);
        });
    }
}

impl Block for DimmerBlock {
    fn on_node_event(&mut self, ctx: &mut BlockContext<'_>, node: usize, event: NodeEvent) {
        if event == NodeEvent::DataChanged && (node == Self::COLOR || node == Self::INTENSITY) {
            self.update(ctx);
        }
    }
}
