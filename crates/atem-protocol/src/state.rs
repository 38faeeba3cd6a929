//! Switcher state model.
//!
//! A device serves its state as a dump of messages; a controller rebuilds a
//! mirror by applying each message it receives. Both sides use the same type.

use std::collections::BTreeMap;

use crate::messages::*;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwitcherState {
    pub version: Option<ProtocolVersion>,
    pub sources: BTreeMap<VideoSource, VideoSourcePropertiesChanged>,
    /// Program source per mix-effect block.
    pub program: BTreeMap<u8, VideoSource>,
    /// Preview source per mix-effect block.
    pub preview: BTreeMap<u8, VideoSource>,
    /// Set once `InCm` has been applied.
    pub initialized: bool,
}

fn internal(
    source: VideoSource,
    long_name: &str,
    short_name: &str,
    availability: Availability,
) -> VideoSourcePropertiesChanged {
    VideoSourcePropertiesChanged {
        source,
        long_name: long_name.to_string(),
        short_name: short_name.to_string(),
        external_interfaces: ExternalInterfaces::empty(),
        kind: SourceKind::Black,
        availability,
        mix_effects: MixEffects::empty(),
    }
}

/// Most inputs a simulated switcher exposes; the input id block ends at 999.
pub const MAX_SIMULATED_INPUTS: u16 = 999;

/// Most mix-effect blocks a simulated switcher exposes. Source capabilities
/// can only name ME1 and ME2.
pub const MAX_SIMULATED_MIX_EFFECTS: u8 = 2;

fn input_short_name(number: u16) -> String {
    match number {
        0..=9 => format!("Cam{number}"),
        10..=99 => format!("Cm{number}"),
        _ => number.to_string(),
    }
}

impl SwitcherState {
    /// Generated state for a simulated device. Counts above
    /// [`MAX_SIMULATED_INPUTS`] and [`MAX_SIMULATED_MIX_EFFECTS`] are capped.
    pub fn simulated(inputs: u16, mix_effects: u8) -> Self {
        let inputs = inputs.min(MAX_SIMULATED_INPUTS);
        let mix_effects = mix_effects.min(MAX_SIMULATED_MIX_EFFECTS);
        let mut state = Self {
            version: Some(ProtocolVersion::CURRENT),
            initialized: true,
            ..Self::default()
        };
        let on_every_me = if mix_effects > 1 {
            MixEffects::ME1_AND_FILL_SOURCES | MixEffects::ME2_AND_FILL_SOURCES
        } else {
            MixEffects::ME1_AND_FILL_SOURCES
        };
        let everywhere = Availability::AUXILIARY | Availability::MULTIVIEWER;

        let mut add = |mut props: VideoSourcePropertiesChanged, mix: MixEffects| {
            props.mix_effects = mix;
            state.sources.insert(props.source, props);
        };

        add(internal(VideoSource::Black, "Black", "Blk", everywhere), on_every_me);
        for n in 0..inputs {
            add(
                VideoSourcePropertiesChanged {
                    source: VideoSource::Input(n),
                    long_name: format!("Camera {}", n + 1),
                    short_name: input_short_name(n + 1),
                    external_interfaces: ExternalInterfaces::SDI | ExternalInterfaces::HDMI,
                    kind: SourceKind::Sdi,
                    availability: everywhere | Availability::SUPER_SOURCE_ART,
                    mix_effects: MixEffects::empty(),
                },
                on_every_me,
            );
        }
        add(
            internal(VideoSource::ColorBars, "Color Bars", "Bars", everywhere),
            on_every_me,
        );
        for n in 0..2u8 {
            let long = format!("Color {}", n + 1);
            let short = format!("Col{}", n + 1);
            add(
                internal(VideoSource::Color(n), &long, &short, everywhere),
                on_every_me,
            );
        }
        add(
            internal(
                VideoSource::MediaPlayer(0),
                "Media Player 1",
                "MP1",
                everywhere | Availability::SUPER_SOURCE_ART,
            ),
            on_every_me,
        );
        add(
            internal(
                VideoSource::MediaPlayerKey(0),
                "Media Player 1 Key",
                "MP1K",
                Availability::SUPER_SOURCE_ART,
            ),
            MixEffects::empty(),
        );
        for me in 0..mix_effects {
            let n = me + 1;
            add(
                internal(
                    VideoSource::Program { me },
                    &format!("ME {n} PGM"),
                    &format!("Pgm{n}"),
                    everywhere,
                ),
                MixEffects::empty(),
            );
            add(
                internal(
                    VideoSource::Preview { me },
                    &format!("ME {n} PVW"),
                    &format!("Pvw{n}"),
                    everywhere,
                ),
                MixEffects::empty(),
            );
        }

        let program = if inputs > 0 {
            VideoSource::Input(0)
        } else {
            VideoSource::Black
        };
        let preview = if inputs > 1 {
            VideoSource::Input(1)
        } else {
            VideoSource::ColorBars
        };
        for me in 0..mix_effects {
            state.program.insert(me, program);
            state.preview.insert(me, preview);
        }
        state
    }

    pub fn apply(&mut self, message: &Message) {
        message.apply(self);
    }

    /// Full state dump in the order a device sends it: version, source
    /// properties, bus selection per mix-effect block, then `InCm`.
    pub fn to_messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.sources.len() + 2 * self.program.len() + 2);
        if let Some(version) = self.version {
            messages.push(version.into());
        }
        messages.extend(self.sources.values().cloned().map(Message::from));
        for (&mix_effect, &source) in &self.program {
            messages.push(ProgramBusChanged { mix_effect, source }.into());
            if let Some(&source) = self.preview.get(&mix_effect) {
                messages.push(PreviewBusChanged { mix_effect, source }.into());
            }
        }
        messages.push(InitiationComplete.into());
        messages
    }

    /// Execute a controller command. Returns the change notification to
    /// broadcast, or `None` if the message is not a command or names a
    /// mix-effect block or source this switcher does not have.
    pub fn apply_command(&mut self, message: &Message) -> Option<Message> {
        let (mix_effect, source) = match message {
            Message::ChangeProgramBus(c) => (c.mix_effect, c.source),
            Message::ChangePreviewBus(c) => (c.mix_effect, c.source),
            _ => return None,
        };
        if !self.program.contains_key(&mix_effect) || !self.sources.contains_key(&source) {
            return None;
        }

        let change: Message = match message {
            Message::ChangeProgramBus(_) => ProgramBusChanged { mix_effect, source }.into(),
            _ => PreviewBusChanged { mix_effect, source }.into(),
        };
        change.apply(self);
        Some(change)
    }
}
