//! Per-channel controller storage and unit conversions

use serde::Serialize;
use std::collections::BTreeMap;

/// Threshold at or above which a switch controller reads as on
pub const SWITCH_THRESHOLD: u16 = 0x3000;

/// Center of a 14-bit controller
pub const CENTER: u16 = 0x2000;

/// Maximum 14-bit controller value
pub const MAX_14BIT: u16 = 0x3FFF;

/// Value of an unselected RPN/NRPN register
pub const NULL_PARAMETER: u16 = 0xFFFF;

/// Data entry value before any byte has been received
pub const DATA_ENTRY_EMPTY: u16 = 0xC000;

/// Data entry flag: the MSB (CC 6) has not arrived yet
pub const DATA_ENTRY_MSB_PENDING: u16 = 0x8000;

/// Data entry flag: the LSB (CC 38) has not arrived yet
pub const DATA_ENTRY_LSB_PENDING: u16 = 0x4000;

/// Lowest raw value of GS/XG clamped parameters (0x0E << 7)
pub const CLAMPED_FLOOR: u16 = 0x0E << 7;

/// Width of a drum parameter bank, one entry per note
pub const DRUM_BANK_WIDTH: usize = 128;

/// Number of ordinary (non-drum) controllers
pub const ORDINARY_CONTROLLERS: usize = 67;

/// Total number of stored controller values
pub const CONTROLLER_SLOTS: usize = ORDINARY_CONTROLLERS + 5 * DRUM_BANK_WIDTH;

/// Controller identifiers
///
/// Ordinary controllers occupy one storage slot each; the drum banks occupy
/// [`DRUM_BANK_WIDTH`] slots addressed by drum note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Controller {
    BankSelect,
    Modulation,
    Breath,
    Foot,
    PortamentoTime,
    DataEntry,
    Volume,
    Balance,
    Pan,
    Expression,
    Effect1,
    Effect2,
    Reverb,
    Tremolo,
    Chorus,
    Celeste,
    Phaser,
    GeneralPurpose1,
    GeneralPurpose2,
    GeneralPurpose3,
    GeneralPurpose4,
    GeneralPurpose5,
    GeneralPurpose6,
    GeneralPurpose7,
    GeneralPurpose8,
    Hold1,
    PortamentoSwitch,
    Sostenuto,
    Soft,
    Legato,
    Hold2,
    Variation,
    Timbre,
    Release,
    Attack,
    Brightness,
    Decay,
    VibratoRate,
    VibratoDepth,
    VibratoDelay,
    Nrpn,
    Rpn,
    PitchBendSensitivity,
    MasterFineTune,
    MasterCoarseTune,
    ModulationDepthRange,
    VibratoRateGs,
    VibratoDepthGs,
    VibratoDelayGs,
    VibratoRateXg,
    VibratoDepthXg,
    VibratoDelayXg,
    TvfCutoffFreq,
    TvfResonance,
    HpfCutoffFreq,
    HpfResonance,
    EqBass,
    EqTreble,
    EqMidBass,
    EqMidTreble,
    EqBassFrequency,
    EqTrebleFrequency,
    EqMidBassFrequency,
    EqMidTrebleFrequency,
    TvfTvaEnvelopeAttackTime,
    TvfTvaEnvelopeDecayTime,
    TvfTvaEnvelopeReleaseTime,
    DrumPitch,
    DrumPan,
    DrumTva,
    DrumReverb,
    DrumChorus,
}

/// Unit conversion applied when reading a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    /// Raw value
    Direct,
    /// High 7 bits
    Coarse,
    /// 0.0..=1.0 over the 14-bit range
    Unsigned,
    /// -1.0..1.0 around the center
    Bipolar,
    /// On at or above [`SWITCH_THRESHOLD`]
    Switch,
    /// Semitones in the high byte, cents in the low byte
    SemitonesCents,
    /// Coarse plus fine/128
    FineCoarse,
    /// GS/XG parameter clamped to [`CLAMPED_FLOOR`], centered on 0
    Clamped,
}

/// Whether a CC number addresses the high or the low 7 bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Half {
    Msb,
    Lsb,
}

impl Controller {
    /// Ordinary controllers in storage order
    pub const ORDINARY: [Controller; ORDINARY_CONTROLLERS] = {
        use Controller::*;
        [
            BankSelect, Modulation, Breath, Foot, PortamentoTime, DataEntry, Volume, Balance,
            Pan, Expression, Effect1, Effect2, Reverb, Tremolo, Chorus, Celeste, Phaser,
            GeneralPurpose1, GeneralPurpose2, GeneralPurpose3, GeneralPurpose4,
            GeneralPurpose5, GeneralPurpose6, GeneralPurpose7, GeneralPurpose8, Hold1,
            PortamentoSwitch, Sostenuto, Soft, Legato, Hold2, Variation, Timbre, Release,
            Attack, Brightness, Decay, VibratoRate, VibratoDepth, VibratoDelay, Nrpn, Rpn,
            PitchBendSensitivity, MasterFineTune, MasterCoarseTune, ModulationDepthRange,
            VibratoRateGs, VibratoDepthGs, VibratoDelayGs, VibratoRateXg, VibratoDepthXg,
            VibratoDelayXg, TvfCutoffFreq, TvfResonance, HpfCutoffFreq, HpfResonance, EqBass,
            EqTreble, EqMidBass, EqMidTreble, EqBassFrequency, EqTrebleFrequency,
            EqMidBassFrequency, EqMidTrebleFrequency, TvfTvaEnvelopeAttackTime,
            TvfTvaEnvelopeDecayTime, TvfTvaEnvelopeReleaseTime,
        ]
    };

    /// Whether this controller is a 128-wide drum bank
    pub fn is_drum_bank(self) -> bool {
        self >= Controller::DrumPitch
    }

    /// Storage index; `aux` selects the drum note and is ignored otherwise
    pub fn index(self, aux: u8) -> usize {
        if self.is_drum_bank() {
            let bank = self as usize - Controller::DrumPitch as usize;
            ORDINARY_CONTROLLERS + bank * DRUM_BANK_WIDTH + (aux as usize & 0x7F)
        } else {
            self as usize
        }
    }

    /// Map a control change number onto a controller
    pub fn from_control_change(cc: u8) -> Option<(Controller, Half)> {
        use Controller::*;
        use Half::*;
        let mapped = match cc {
            0 => (BankSelect, Msb),
            1 => (Modulation, Msb),
            2 => (Breath, Msb),
            4 => (Foot, Msb),
            5 => (PortamentoTime, Msb),
            6 => (DataEntry, Msb),
            7 => (Volume, Msb),
            8 => (Balance, Msb),
            10 => (Pan, Msb),
            11 => (Expression, Msb),
            12 => (Effect1, Msb),
            13 => (Effect2, Msb),
            16 => (GeneralPurpose1, Msb),
            17 => (GeneralPurpose2, Msb),
            18 => (GeneralPurpose3, Msb),
            19 => (GeneralPurpose4, Msb),
            32..=51 => {
                let (controller, _) = Self::from_control_change(cc - 32)?;
                (controller, Lsb)
            }
            64 => (Hold1, Msb),
            65 => (PortamentoSwitch, Msb),
            66 => (Sostenuto, Msb),
            67 => (Soft, Msb),
            68 => (Legato, Msb),
            69 => (Hold2, Msb),
            70 => (Variation, Msb),
            71 => (Timbre, Msb),
            72 => (Release, Msb),
            73 => (Attack, Msb),
            74 => (Brightness, Msb),
            75 => (Decay, Msb),
            76 => (VibratoRate, Msb),
            77 => (VibratoDepth, Msb),
            78 => (VibratoDelay, Msb),
            80 => (GeneralPurpose5, Msb),
            81 => (GeneralPurpose6, Msb),
            82 => (GeneralPurpose7, Msb),
            83 => (GeneralPurpose8, Msb),
            91 => (Reverb, Msb),
            92 => (Tremolo, Msb),
            93 => (Chorus, Msb),
            94 => (Celeste, Msb),
            95 => (Phaser, Msb),
            98 => (Nrpn, Lsb),
            99 => (Nrpn, Msb),
            100 => (Rpn, Lsb),
            101 => (Rpn, Msb),
            _ => return None,
        };
        Some(mapped)
    }

    /// Conversion used by [`ChannelState::get`]
    pub fn conversion(self) -> Conversion {
        use Controller::*;
        match self {
            BankSelect | DataEntry | Nrpn | Rpn => Conversion::Direct,
            MasterCoarseTune => Conversion::Coarse,
            Hold1 | PortamentoSwitch | Sostenuto | Legato | Hold2 => Conversion::Switch,
            Balance | Pan | MasterFineTune | Variation | Timbre | Release | Attack
            | Brightness | Decay | VibratoRate | VibratoDepth | VibratoDelay | DrumPitch
            | DrumPan => Conversion::Bipolar,
            PitchBendSensitivity => Conversion::SemitonesCents,
            ModulationDepthRange => Conversion::FineCoarse,
            VibratoRateGs | VibratoDepthGs | VibratoDelayGs | VibratoRateXg | VibratoDepthXg
            | VibratoDelayXg | TvfCutoffFreq | TvfResonance | HpfCutoffFreq | HpfResonance
            | EqBass | EqTreble | EqMidBass | EqMidTreble | EqBassFrequency
            | EqTrebleFrequency | EqMidBassFrequency | EqMidTrebleFrequency
            | TvfTvaEnvelopeAttackTime | TvfTvaEnvelopeDecayTime
            | TvfTvaEnvelopeReleaseTime => Conversion::Clamped,
            _ => Conversion::Unsigned,
        }
    }

    /// Power-on value
    pub fn default_value(self) -> u16 {
        use Controller::*;
        match self {
            Volume => 100 << 7,
            Expression | Foot | Breath => 127 << 7,
            Nrpn | Rpn => NULL_PARAMETER,
            DataEntry => DATA_ENTRY_EMPTY,
            PitchBendSensitivity => 2 << 7,
            MasterCoarseTune => 64 << 7,
            ModulationDepthRange => 0x40,
            DrumTva | DrumReverb | DrumChorus => 127 << 7,
            _ => match self.conversion() {
                Conversion::Bipolar | Conversion::Clamped => CENTER,
                _ => 0,
            },
        }
    }
}

impl Conversion {
    /// Convert a raw 14-bit value
    pub fn apply(self, raw: u16) -> f32 {
        match self {
            Conversion::Direct => raw as f32,
            Conversion::Coarse => (raw >> 7) as f32,
            Conversion::Unsigned => raw as f32 / MAX_14BIT as f32,
            Conversion::Bipolar => raw as f32 / CENTER as f32 - 1.0,
            Conversion::Switch => {
                if raw >= SWITCH_THRESHOLD {
                    1.0
                } else {
                    0.0
                }
            }
            Conversion::SemitonesCents => (raw >> 7) as f32 + (raw & 0x7F) as f32 / 100.0,
            Conversion::FineCoarse => (raw >> 7) as f32 + (raw & 0x7F) as f32 / 128.0,
            Conversion::Clamped => {
                let clamped = raw.clamp(CLAMPED_FLOOR, MAX_14BIT - CLAMPED_FLOOR);
                (clamped - CLAMPED_FLOOR) as f32 / (CENTER - CLAMPED_FLOOR) as f32 - 1.0
            }
        }
    }
}

/// Controller values and voice-level state of one MIDI channel
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelState {
    channel: u8,
    values: Vec<u16>,
    program: u8,
    pitch_bend: i16,
    pressure: u8,
}

/// Serializable view of a channel, for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct ChannelSnapshot {
    pub channel: u8,
    pub program: u8,
    pub pitch_bend: i16,
    pub pressure: u8,
    pub volume_db: f32,
    pub controllers: BTreeMap<Controller, u16>,
}

impl ChannelState {
    /// Power-on state of `channel`
    pub fn new(channel: u8) -> Self {
        let mut state = Self {
            channel,
            values: vec![0; CONTROLLER_SLOTS],
            program: 0,
            pitch_bend: 0,
            pressure: 127,
        };
        state.reset_all();
        state
    }

    /// Restore every value to its power-on default
    pub fn reset_all(&mut self) {
        for controller in Controller::ORDINARY {
            self.values[controller.index(0)] = controller.default_value();
        }
        for bank in [
            Controller::DrumPitch,
            Controller::DrumPan,
            Controller::DrumTva,
            Controller::DrumReverb,
            Controller::DrumChorus,
        ] {
            for note in 0..DRUM_BANK_WIDTH as u8 {
                self.values[bank.index(note)] = bank.default_value();
            }
        }
        self.program = 0;
        self.pitch_bend = 0;
        self.pressure = 127;
    }

    /// Reset the controllers covered by Reset All Controllers (CC 121)
    pub fn reset_controllers(&mut self) {
        use Controller::*;
        for controller in [
            Modulation, Expression, Hold1, PortamentoSwitch, Sostenuto, Soft, Legato, Hold2,
            Nrpn, Rpn, DataEntry,
        ] {
            self.values[controller.index(0)] = controller.default_value();
        }
        self.pitch_bend = 0;
        self.pressure = 127;
    }

    /// Channel number (0-based)
    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Raw stored value
    pub fn raw(&self, controller: Controller, aux: u8) -> u16 {
        self.values[controller.index(aux)]
    }

    /// Store a raw value
    pub fn set_raw(&mut self, controller: Controller, aux: u8, value: u16) {
        self.values[controller.index(aux)] = value;
    }

    /// Value converted by the controller's [`Conversion`]
    pub fn get(&self, controller: Controller, aux: u8) -> f32 {
        controller.conversion().apply(self.raw(controller, aux))
    }

    /// High 7 bits of a controller
    pub fn coarse(&self, controller: Controller) -> u8 {
        (self.raw(controller, 0) >> 7) as u8
    }

    /// Whether a switch controller is on
    pub fn is_on(&self, controller: Controller) -> bool {
        self.raw(controller, 0) >= SWITCH_THRESHOLD
    }

    pub fn program(&self) -> u8 {
        self.program
    }

    pub fn set_program(&mut self, program: u8) {
        self.program = program;
    }

    /// Signed pitch bend, -0x2000..=0x1FFF
    pub fn pitch_bend(&self) -> i16 {
        self.pitch_bend
    }

    pub fn set_pitch_bend(&mut self, value: i16) {
        self.pitch_bend = value;
    }

    pub fn pressure(&self) -> u8 {
        self.pressure
    }

    pub fn set_pressure(&mut self, value: u8) {
        self.pressure = value;
    }

    /// Selected bank as a 14-bit id
    pub fn bank(&self) -> u16 {
        self.raw(Controller::BankSelect, 0) & MAX_14BIT
    }

    /// Pitch bend range in semitones
    pub fn pitch_bend_sensitivity(&self) -> f32 {
        self.get(Controller::PitchBendSensitivity, 0)
    }

    /// Master tuning offset in semitones
    pub fn master_tune(&self) -> f32 {
        let coarse = self.coarse(Controller::MasterCoarseTune) as f32 - 64.0;
        coarse + self.get(Controller::MasterFineTune, 0)
    }

    /// Portamento time, 0 while the portamento switch is off
    pub fn portamento_time(&self) -> f32 {
        if self.is_on(Controller::PortamentoSwitch) {
            self.get(Controller::PortamentoTime, 0)
        } else {
            0.0
        }
    }

    /// Soft pedal attenuation factor, 1.0 when released
    pub fn soft_factor(&self) -> f32 {
        let soft = (0x7F - self.coarse(Controller::Soft) as u32) as f32;
        (soft + 256.0) / 383.0
    }

    /// Channel gain in dB summed from volume, expression, foot, breath,
    /// channel pressure and the soft pedal
    pub fn effective_volume_db(&self) -> f32 {
        let factors = [
            self.get(Controller::Volume, 0),
            self.get(Controller::Expression, 0),
            self.get(Controller::Foot, 0),
            self.get(Controller::Breath, 0),
            self.pressure as f32 / 127.0,
            self.soft_factor(),
        ];
        if factors.iter().any(|&f| f == 0.0) {
            return f32::NEG_INFINITY;
        }
        factors.iter().map(|f| 40.0 * f.log10()).sum()
    }

    /// Diagnostic view of the current state
    pub fn snapshot(&self) -> ChannelSnapshot {
        ChannelSnapshot {
            channel: self.channel,
            program: self.program,
            pitch_bend: self.pitch_bend,
            pressure: self.pressure,
            volume_db: self.effective_volume_db(),
            controllers: Controller::ORDINARY
                .iter()
                .map(|&c| (c, self.raw(c, 0)))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_layout() {
        assert_eq!(Controller::Hold1.index(0), 25);
        assert_eq!(Controller::Nrpn.index(0), 40);
        assert_eq!(Controller::TvfTvaEnvelopeReleaseTime.index(0), 66);
        assert_eq!(Controller::DrumPitch.index(0), 67);
        assert_eq!(Controller::DrumPan.index(5), 67 + 128 + 5);
        assert_eq!(Controller::DrumChorus.index(127), CONTROLLER_SLOTS - 1);
        for (i, c) in Controller::ORDINARY.iter().enumerate() {
            assert_eq!(c.index(0), i);
        }
    }

    #[test]
    fn test_control_change_map() {
        assert_eq!(
            Controller::from_control_change(7),
            Some((Controller::Volume, Half::Msb))
        );
        assert_eq!(
            Controller::from_control_change(39),
            Some((Controller::Volume, Half::Lsb))
        );
        assert_eq!(
            Controller::from_control_change(99),
            Some((Controller::Nrpn, Half::Msb))
        );
        assert_eq!(Controller::from_control_change(35), None);
        assert_eq!(Controller::from_control_change(127), None);
    }

    #[test]
    fn test_conversions() {
        assert_eq!(Conversion::Coarse.apply(0x3F80), 127.0);
        assert_eq!(Conversion::Unsigned.apply(MAX_14BIT), 1.0);
        assert_eq!(Conversion::Bipolar.apply(CENTER), 0.0);
        assert_eq!(Conversion::Bipolar.apply(0), -1.0);
        assert_eq!(Conversion::Switch.apply(0x2FFF), 0.0);
        assert_eq!(Conversion::Switch.apply(0x3000), 1.0);
        assert_eq!(Conversion::SemitonesCents.apply(2 << 7 | 50), 2.5);
        assert_eq!(Conversion::FineCoarse.apply(1 << 7 | 64), 1.5);
        assert_eq!(Conversion::Clamped.apply(0), -1.0);
        assert_eq!(Conversion::Clamped.apply(CENTER), 0.0);
        assert_eq!(Conversion::Clamped.apply(MAX_14BIT), 1.0);
    }

    #[test]
    fn test_defaults() {
        let state = ChannelState::new(3);
        assert_eq!(state.channel(), 3);
        assert_eq!(state.coarse(Controller::Volume), 100);
        assert_eq!(state.raw(Controller::Rpn, 0), NULL_PARAMETER);
        assert_eq!(state.raw(Controller::DataEntry, 0), DATA_ENTRY_EMPTY);
        assert_eq!(state.pitch_bend_sensitivity(), 2.0);
        assert_eq!(state.master_tune(), 0.0);
        assert_eq!(state.get(Controller::Pan, 0), 0.0);
        assert_eq!(state.get(Controller::TvfTvaEnvelopeAttackTime, 0), 0.0);
        assert_eq!(state.pressure(), 127);
        assert!(!state.is_on(Controller::Hold1));
    }

    #[test]
    fn test_effective_volume() {
        let mut state = ChannelState::new(0);
        for c in [
            Controller::Volume,
            Controller::Expression,
            Controller::Foot,
            Controller::Breath,
        ] {
            state.set_raw(c, 0, MAX_14BIT);
        }
        assert!(state.effective_volume_db().abs() < 1e-4);

        state.set_raw(Controller::Volume, 0, 0);
        assert_eq!(state.effective_volume_db(), f32::NEG_INFINITY);

        state.set_raw(Controller::Volume, 0, MAX_14BIT);
        state.set_pressure(0);
        assert_eq!(state.effective_volume_db(), f32::NEG_INFINITY);
    }

    #[test]
    fn test_soft_pedal_attenuates() {
        let mut state = ChannelState::new(0);
        let open = state.effective_volume_db();
        state.set_raw(Controller::Soft, 0, 127 << 7);
        assert!(state.effective_volume_db() < open);
        assert!(state.effective_volume_db().is_finite());
    }

    #[test]
    fn test_portamento_time_gated() {
        let mut state = ChannelState::new(0);
        state.set_raw(Controller::PortamentoTime, 0, MAX_14BIT);
        assert_eq!(state.portamento_time(), 0.0);
        state.set_raw(Controller::PortamentoSwitch, 0, 127 << 7);
        assert_eq!(state.portamento_time(), 1.0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let state = ChannelState::new(1);
        let json = serde_json::to_value(state.snapshot()).unwrap();
        assert_eq!(json["channel"], 1);
        assert_eq!(json["controllers"]["volume"], 100 << 7);
    }
}
