//! Reference protocol decoders
//!
//! Signal-level decoders implement [`LogicDecoder`](crate::runtime::LogicDecoder),
//! decoders stacked on another decoder's packets implement
//! [`StackedDecoder`](crate::runtime::StackedDecoder).

pub mod ds1307;
pub mod i2c;
pub mod i2c_demux;
pub mod miller;
pub mod wiegand;

use crate::runtime::{Decoder, DecoderInfo};

// Re-export decoders
pub use ds1307::{DateTime, Ds1307};
pub use i2c::{I2c, I2cPacket};
pub use i2c_demux::I2cDemux;
pub use miller::Miller;
pub use wiegand::Wiegand;

/// Descriptions of every built-in decoder
pub fn decoders() -> Vec<&'static DecoderInfo> {
    vec![
        I2c::new().info(),
        I2cDemux::new().info(),
        Ds1307::new().info(),
        Miller::new().info(),
        Wiegand::new().info(),
    ]
}

/// Look up a built-in decoder description by id
pub fn find(id: &str) -> Option<&'static DecoderInfo> {
    decoders().into_iter().find(|info| info.id == id)
}
