//! Quality-of-service byte shared by every request kind.
//!
//! One byte carries independent facets: whether a message initialises server-side
//! request state, fetches data, asks for a combined put+get, or releases the request
//! after replying. Facets combine (`DESTROY | GET` is "fetch the final value and
//! destroy in one round trip"), so receivers must test them with [`QoS::is_set`].

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// QoS bitmask.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct QoS(u8);

impl QoS {
    /// Plain operation.
    pub const DEFAULT: QoS = QoS(0x00);
    /// Reply is required.
    pub const REPLY_REQUIRED: QoS = QoS(0x01);
    /// Best-effort delivery.
    pub const BEST_EFFORT: QoS = QoS(0x02);
    /// Process the record.
    pub const PROCESS: QoS = QoS(0x04);
    /// First message: create server-side request state, reply with introspection data.
    pub const INIT: QoS = QoS(0x08);
    /// Release server-side request state after replying.
    pub const DESTROY: QoS = QoS(0x10);
    /// Share data.
    pub const SHARE: QoS = QoS(0x20);
    /// Data flows server to client.
    pub const GET: QoS = QoS(0x40);
    /// Combined put+get query.
    pub const GET_PUT: QoS = QoS(0x80);

    const NAMES: [(QoS, &'static str); 8] = [
        (QoS::REPLY_REQUIRED, "REPLY_REQUIRED"),
        (QoS::BEST_EFFORT, "BEST_EFFORT"),
        (QoS::PROCESS, "PROCESS"),
        (QoS::INIT, "INIT"),
        (QoS::DESTROY, "DESTROY"),
        (QoS::SHARE, "SHARE"),
        (QoS::GET, "GET"),
        (QoS::GET_PUT, "GET_PUT"),
    ];

    /// Builds a mask from its wire byte.
    pub const fn from_bits(bits: u8) -> Self {
        QoS(bits)
    }

    /// Returns the wire byte.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Returns true if every bit of `facet` is set. `DEFAULT` is never "set".
    pub const fn is_set(self, facet: QoS) -> bool {
        facet.0 != 0 && self.0 & facet.0 == facet.0
    }

    /// Returns this mask with `facet` added when `condition` holds.
    pub const fn with_if(self, condition: bool, facet: QoS) -> Self {
        if condition {
            QoS(self.0 | facet.0)
        } else {
            self
        }
    }
}

impl BitOr for QoS {
    type Output = QoS;

    fn bitor(self, rhs: QoS) -> QoS {
        QoS(self.0 | rhs.0)
    }
}

impl BitOrAssign for QoS {
    fn bitor_assign(&mut self, rhs: QoS) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for QoS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return f.write_str("DEFAULT");
        }
        let mut first = true;
        for (facet, name) in QoS::NAMES {
            if self.is_set(facet) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}
