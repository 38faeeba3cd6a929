//! Bit-packed capability sets carried in `InPr`.
//!
//! Bit `i` (LSB first) maps to one fixed capability. Bits outside the known
//! set are dropped on decode and written as zero on encode.

use std::fmt;
use std::ops::BitOr;

use serde::{Serialize, Serializer};

macro_rules! capability_set {
    (
        $(#[$meta:meta])*
        pub struct $name:ident {
            $( $(#[$flag_meta:meta])* const $flag:ident = $bit:expr, $label:literal; )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name(u8);

        impl $name {
            $( $(#[$flag_meta])* pub const $flag: Self = Self(1 << $bit); )+

            const KNOWN: u8 = 0 $( | (1 << $bit) )+;
            const LABELS: &'static [(Self, &'static str)] = &[ $( (Self::$flag, $label), )+ ];

            pub const fn empty() -> Self {
                Self(0)
            }

            /// Keep known bits, silently drop the rest.
            pub const fn from_bits_truncate(bits: u8) -> Self {
                Self(bits & Self::KNOWN)
            }

            pub const fn bits(self) -> u8 {
                self.0
            }

            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }

            /// Labels of the capabilities present, lowest bit first.
            pub fn labels(self) -> impl Iterator<Item = &'static str> {
                Self::LABELS
                    .iter()
                    .filter(move |(flag, _)| self.contains(*flag))
                    .map(|(_, label)| *label)
            }
        }

        impl BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_set().entries(self.labels()).finish()
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_seq(self.labels())
            }
        }
    };
}

capability_set! {
    /// Physical connectors a source can be routed from.
    pub struct ExternalInterfaces {
        const SDI = 0, "sdi";
        const HDMI = 1, "hdmi";
        const COMPOSITE = 2, "composite";
        const COMPONENT = 3, "component";
        const S_VIDEO = 4, "s_video";
    }
}

capability_set! {
    /// Outputs a source may be selected on.
    pub struct Availability {
        const AUXILIARY = 0, "auxiliary";
        const MULTIVIEWER = 1, "multiviewer";
        const SUPER_SOURCE_ART = 2, "super_source_art";
    }
}

capability_set! {
    /// Mix-effect blocks a source can feed, together with their fill sources.
    pub struct MixEffects {
        const ME1_AND_FILL_SOURCES = 0, "me1_and_fill_sources";
        const ME2_AND_FILL_SOURCES = 1, "me2_and_fill_sources";
    }
}
