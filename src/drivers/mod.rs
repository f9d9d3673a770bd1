//! Instrument drivers.
//!
//! Each driver module exports its connection defaults (`default_connection`,
//! and `serial_settings` where the instrument is usually on RS-232) next to the
//! driver type, so [`crate::registry`] can build a session without knowing the
//! command set.
//!
//! | Driver | Instrument |
//! |--------|------------|
//! | [`AgilentN5183B`] | Agilent N5183B MXG signal generator |
//! | [`Cryomagnetics4G`] | Cryomagnetics 4G magnet power supply |
//! | [`RohdeSchwarzFsw`] | R&S FSW spectrum analyzer |
//! | [`UnibaselSp927`] | Uni Basel SP927 LNHR DAC |
//! | [`Yokogawa7651`] | Yokogawa 7651 DC source |

pub mod agilent_n5183b;
pub mod cryomagnetics_4g;
pub mod rohde_schwarz_fsw;
pub mod unibasel_sp927;
pub mod yokogawa_7651;

pub use agilent_n5183b::AgilentN5183B;
pub use cryomagnetics_4g::Cryomagnetics4G;
pub use rohde_schwarz_fsw::RohdeSchwarzFsw;
pub use unibasel_sp927::UnibaselSp927;
pub use yokogawa_7651::Yokogawa7651;
