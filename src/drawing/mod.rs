pub mod canvas;

pub use canvas::{parse_color, Canvas, DEFAULT_STROKE_COLOR};
