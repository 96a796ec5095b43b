//! Items used by code generated with `#[derive(Values)]` and
//! [component_value](crate::component_value).

pub use memoffset::offset_of;
