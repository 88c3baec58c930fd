//! The configuration store of one device.
//!
//! [`DeviceConfig`] holds every setting the host can read or change and validates changes. It
//! never touches the hardware: a successful [`DeviceConfig::set`] reports what else has to happen
//! through [`Applied`], and the device layer carries that out.

use crate::{
    channel_mode::{
        self,
        ChannelMode,
    },
    core::{
        align_samples,
        localized,
        Lang,
        Names,
        OperationMode,
        UsbSpeed,
        MAX_CHANNELS,
        PWM_CLK,
        PWM_MAX_FREQ,
    },
    error::Error,
    profile::{
        Profile,
        FEATURE_USB30,
    },
    trigger::TriggerSpec,
};
use kstring::KString;
use num_traits::{
    FromPrimitive,
    ToPrimitive,
};
use pxlogic_proto::regs;
use tracing::debug;

/// Identifiers accepted by `get_config`, `set_config` and `list_config`
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    SampleRate,
    LimitSamples,
    LimitMsec,
    OperationMode,
    ChannelMode,
    /// Input threshold voltage
    Vth,
    /// Sample on the falling edge of an external clock
    ClockEdge,
    ExtTriggerMode,
    Filter,
    TriggerOut,
    Pwm0Enable,
    Pwm0Freq,
    Pwm0Duty,
    Pwm1Enable,
    Pwm1Freq,
    Pwm1Duty,
    /// Keep streaming past the sample limit
    LoopMode,
    /// Host buffer budget for stream mode, in GiB
    StreamBuffSize,
    TriggerPercent,
    // Read only
    HwDepth,
    ValidChannelCount,
    UsbSpeed,
    Usb30Support,
    Stream,
    TriggerPositionSet,
}

impl ConfigKey {
    #[must_use]
    pub fn is_read_only(self) -> bool {
        matches!(
            self,
            Self::HwDepth
                | Self::ValidChannelCount
                | Self::UsbSpeed
                | Self::Usb30Support
                | Self::Stream
                | Self::TriggerPositionSet
        )
    }

    /// Settings that can't change while an acquisition runs
    #[must_use]
    pub fn is_acquisition_tied(self) -> bool {
        matches!(
            self,
            Self::SampleRate
                | Self::LimitSamples
                | Self::LimitMsec
                | Self::OperationMode
                | Self::ChannelMode
        )
    }
}

/// One entry of an option list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListItem {
    pub id: i32,
    pub name: KString,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Uint(u64),
    Int(i64),
    Bool(bool),
    Double(f64),
    Text(KString),
    Item(ListItem),
}

macro_rules! accessor {
    ($fn:ident, $variant:ident, $ty:ty) => {
        /// The payload, if the value has this type
        #[must_use]
        pub fn $fn(&self) -> Option<$ty> {
            match self {
                Self::$variant(v) => Some(*v),
                _ => None,
            }
        }
    };
}

impl ConfigValue {
    accessor!(as_uint, Uint, u64);
    accessor!(as_int, Int, i64);
    accessor!(as_bool, Bool, bool);
    accessor!(as_double, Double, f64);
}

fn typed<T>(key: ConfigKey, value: Option<T>) -> Result<T, Error> {
    value.ok_or_else(|| Error::unsupported(format!("wrong value type for {key:?}")))
}

/// What the caller has to do after a setting was stored
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Applied {
    Stored,
    /// The sample rate changed, so sample counts are no longer comparable
    ResetCounter,
    /// Write the registers of this PWM generator
    PushPwm(usize),
}

struct OptionEntry {
    code: i32,
    names: Names,
}

static OPERATION_MODES: [OptionEntry; 2] = [
    OptionEntry {
        code: 0,
        names: &[(Lang::En, "Buffer Mode"), (Lang::Zh, "缓冲模式")],
    },
    OptionEntry {
        code: 1,
        names: &[(Lang::En, "Stream Mode"), (Lang::Zh, "流模式")],
    },
];

static FILTERS: [OptionEntry; 2] = [
    OptionEntry {
        code: 0,
        names: &[(Lang::En, "None"), (Lang::Zh, "无")],
    },
    OptionEntry {
        code: 1,
        names: &[(Lang::En, "1 Sample Clock"), (Lang::Zh, "1个采样时钟")],
    },
];

/// External trigger input conditions, by register code
static EXT_TRIGGER_MODES: [OptionEntry; 6] = [
    OptionEntry {
        code: 0,
        names: &[(Lang::En, "close"), (Lang::Zh, "关闭")],
    },
    OptionEntry {
        code: 1,
        names: &[(Lang::En, "Rising"), (Lang::Zh, "上升沿")],
    },
    OptionEntry {
        code: 2,
        names: &[(Lang::En, "One"), (Lang::Zh, "高电平")],
    },
    OptionEntry {
        code: 3,
        names: &[(Lang::En, "Falling"), (Lang::Zh, "下降沿")],
    },
    OptionEntry {
        code: 4,
        names: &[(Lang::En, "Zero"), (Lang::Zh, "低电平")],
    },
    OptionEntry {
        code: 5,
        names: &[(Lang::En, "Edge"), (Lang::Zh, "双边沿")],
    },
];

fn items(entries: &[OptionEntry], lang: Lang) -> Vec<ConfigValue> {
    entries
        .iter()
        .map(|e| {
            ConfigValue::Item(ListItem {
                id: e.code,
                name: KString::from_static(localized(e.names, lang)),
            })
        })
        .collect()
}

fn find_code(entries: &[OptionEntry], text: &str) -> Option<i32> {
    entries
        .iter()
        .find(|e| e.names.iter().any(|(_, n)| *n == text))
        .map(|e| e.code)
}

/// One of the two square-wave generators
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Pwm {
    pub enabled: bool,
    /// Frequency actually produced, in hertz
    pub freq: f64,
    /// Duty cycle actually produced, in percent
    pub duty: f64,
    /// Period in PWM clock ticks
    pub freq_ticks: u32,
    /// High time in PWM clock ticks
    pub duty_ticks: u32,
}

impl Default for Pwm {
    fn default() -> Self {
        let freq_ticks = PWM_CLK / 1000;
        let mut pwm = Self {
            enabled: false,
            freq: f64::from(PWM_CLK) / f64::from(freq_ticks),
            duty: 0.0,
            freq_ticks,
            duty_ticks: 0,
        };
        pwm.update_duty(50.0);
        pwm
    }
}

impl Pwm {
    /// # Errors
    /// Returns [`Error::Unsupported`] unless `0 < freq <= 1 MHz`
    #[allow(clippy::cast_possible_truncation)]
    #[allow(clippy::cast_sign_loss)]
    pub fn set_freq(&mut self, freq: f64) -> Result<(), Error> {
        if !(freq > 0.0 && freq <= PWM_MAX_FREQ) {
            return Err(Error::unsupported(format!("PWM frequency {freq} Hz")));
        }
        self.freq_ticks = (f64::from(PWM_CLK) / freq) as u32;
        self.freq = f64::from(PWM_CLK) / f64::from(self.freq_ticks);
        self.update_duty(self.duty);
        Ok(())
    }

    /// # Errors
    /// Returns [`Error::Unsupported`] unless `0 <= duty <= 100`
    pub fn set_duty(&mut self, duty: f64) -> Result<(), Error> {
        if !(0.0..=100.0).contains(&duty) {
            return Err(Error::unsupported(format!("PWM duty {duty} %")));
        }
        self.update_duty(duty);
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    #[allow(clippy::cast_sign_loss)]
    fn update_duty(&mut self, duty: f64) {
        self.duty_ticks = (f64::from(self.freq_ticks) * duty / 100.0).round() as u32;
        self.duty = f64::from(self.duty_ticks) * 100.0 / f64::from(self.freq_ticks);
    }

    /// The register writes that load generator `index`, in order: stop, period, high time, enable
    #[must_use]
    pub fn register_writes(&self, index: usize) -> [(u32, u32); 4] {
        let (enable, period, duty) = if index == 0 {
            (regs::PWM0_ENABLE, regs::PWM0_PERIOD, regs::PWM0_DUTY)
        } else {
            (regs::PWM1_ENABLE, regs::PWM1_PERIOD, regs::PWM1_DUTY)
        };
        [
            (enable, 0),
            (period, self.freq_ticks.saturating_sub(1)),
            (duty, self.duty_ticks.saturating_sub(1)),
            (enable, u32::from(self.enabled)),
        ]
    }
}

/// A logic input and whether it takes part in captures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub index: u16,
    pub name: KString,
    pub enabled: bool,
}

fn probes(num: u16) -> Vec<Probe> {
    (0..num)
        .map(|index| Probe {
            index,
            name: KString::from_string(index.to_string()),
            enabled: true,
        })
        .collect()
}

/// Everything configurable about one opened device
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub profile: &'static Profile,
    pub speed: UsbSpeed,
    pub language: Lang,
    pub channel_mode: &'static ChannelMode,
    pub operation_mode: OperationMode,
    pub samplerate: u64,
    pub limit_samples: u64,
    pub limit_msec: u64,
    /// Volts
    pub vth: f64,
    pub clock_falling_edge: bool,
    pub ext_trigger_mode: u16,
    pub filter: u16,
    pub trigger_out: bool,
    pub pwm: [Pwm; 2],
    pub loop_mode: bool,
    /// GiB
    pub stream_buff_size: f64,
    pub trigger: TriggerSpec,
    pub probes: Vec<Probe>,
    /// Trigger position programmed by the last start, in samples
    pub trigger_pos_set: u64,
}

impl DeviceConfig {
    /// The defaults for a freshly opened device of `profile`
    /// # Errors
    /// Returns [`Error::Unsupported`] if the profile's default channel mode isn't in the table
    pub fn new(profile: &'static Profile, speed: UsbSpeed, language: Lang) -> Result<Self, Error> {
        let channel_mode = channel_mode::by_id(profile.caps.default_channel).ok_or_else(|| {
            Error::unsupported(format!("channel mode {}", profile.caps.default_channel))
        })?;
        Ok(Self {
            profile,
            speed,
            language,
            channel_mode,
            operation_mode: if channel_mode.stream {
                OperationMode::Stream
            } else {
                OperationMode::Buffer
            },
            samplerate: channel_mode.default_samplerate,
            limit_samples: channel_mode.default_samplelimit,
            limit_msec: 0,
            vth: 2.0,
            clock_falling_edge: false,
            ext_trigger_mode: 0,
            filter: 0,
            trigger_out: false,
            pwm: [Pwm::default(); 2],
            loop_mode: false,
            stream_buff_size: 16.0,
            trigger: TriggerSpec::default(),
            probes: probes(channel_mode.num),
            trigger_pos_set: 0,
        })
    }

    /// Whether samples are streamed rather than buffered onboard
    #[must_use]
    pub fn stream(&self) -> bool {
        self.channel_mode.stream
    }

    /// Bitmask of enabled probes
    #[must_use]
    pub fn channel_enable_mask(&self) -> u32 {
        self.probes
            .iter()
            .filter(|p| p.enabled && usize::from(p.index) < MAX_CHANNELS)
            .fold(0, |m, p| m | 1 << p.index)
    }

    #[must_use]
    pub fn enabled_channels(&self) -> u32 {
        self.channel_enable_mask().count_ones()
    }

    /// # Errors
    /// Returns [`Error::Unsupported`] if the probe doesn't exist
    pub fn set_channel_enabled(&mut self, index: u16, enabled: bool) -> Result<(), Error> {
        let probe = self
            .probes
            .iter_mut()
            .find(|p| p.index == index)
            .ok_or_else(|| Error::unsupported(format!("probe {index}")))?;
        probe.enabled = enabled;
        Ok(())
    }

    /// Capture depth in samples per enabled channel
    #[allow(clippy::cast_possible_truncation)]
    #[allow(clippy::cast_sign_loss)]
    #[must_use]
    pub fn hw_depth(&self) -> u64 {
        let ch = u64::from(self.enabled_channels().max(1));
        let unit_bits = u64::from(self.channel_mode.unit_bits.max(1));
        let bits = if self.stream() {
            (self.stream_buff_size * f64::from(1u32 << 30)) as u64 * 8
        } else {
            self.profile.caps.hw_depth
        };
        bits / unit_bits / ch
    }

    /// Sample limit an acquisition runs to, with a time limit turned into samples
    #[must_use]
    pub fn effective_limit(&self) -> u64 {
        if self.limit_msec > 0 {
            let samples = u128::from(self.samplerate) * u128::from(self.limit_msec) / 1000;
            align_samples(u64::try_from(samples).unwrap_or(u64::MAX))
        } else {
            self.limit_samples
        }
    }

    /// # Errors
    /// Returns [`Error::Unsupported`] for keys without a readable value
    pub fn get(&self, key: ConfigKey) -> Result<ConfigValue, Error> {
        Ok(match key {
            ConfigKey::SampleRate => ConfigValue::Uint(self.samplerate),
            ConfigKey::LimitSamples => ConfigValue::Uint(self.limit_samples),
            ConfigKey::LimitMsec => ConfigValue::Uint(self.limit_msec),
            ConfigKey::OperationMode => {
                ConfigValue::Int(self.operation_mode.to_i64().unwrap_or_default())
            }
            ConfigKey::ChannelMode => ConfigValue::Int(i64::from(self.channel_mode.id)),
            ConfigKey::Vth => ConfigValue::Double(self.vth),
            ConfigKey::ClockEdge => ConfigValue::Bool(self.clock_falling_edge),
            ConfigKey::ExtTriggerMode => ConfigValue::Int(i64::from(self.ext_trigger_mode)),
            ConfigKey::Filter => ConfigValue::Int(i64::from(self.filter)),
            ConfigKey::TriggerOut => ConfigValue::Bool(self.trigger_out),
            ConfigKey::Pwm0Enable => ConfigValue::Bool(self.pwm[0].enabled),
            ConfigKey::Pwm0Freq => ConfigValue::Double(self.pwm[0].freq),
            ConfigKey::Pwm0Duty => ConfigValue::Double(self.pwm[0].duty),
            ConfigKey::Pwm1Enable => ConfigValue::Bool(self.pwm[1].enabled),
            ConfigKey::Pwm1Freq => ConfigValue::Double(self.pwm[1].freq),
            ConfigKey::Pwm1Duty => ConfigValue::Double(self.pwm[1].duty),
            ConfigKey::LoopMode => ConfigValue::Bool(self.loop_mode),
            ConfigKey::StreamBuffSize => ConfigValue::Double(self.stream_buff_size),
            ConfigKey::TriggerPercent => ConfigValue::Uint(u64::from(self.trigger.percent)),
            ConfigKey::HwDepth => ConfigValue::Uint(self.hw_depth()),
            ConfigKey::ValidChannelCount => ConfigValue::Int(i64::from(self.channel_mode.num)),
            ConfigKey::UsbSpeed => ConfigValue::Text(KString::from_static(self.speed.name())),
            ConfigKey::Usb30Support => ConfigValue::Bool(
                self.speed == UsbSpeed::Super && self.profile.caps.has_feature(FEATURE_USB30),
            ),
            ConfigKey::Stream => ConfigValue::Bool(self.stream()),
            ConfigKey::TriggerPositionSet => ConfigValue::Uint(self.trigger_pos_set),
        })
    }

    /// Validate and store a setting. Readiness checks are the caller's.
    /// # Errors
    /// Returns [`Error::Unsupported`] for read-only keys, values of the wrong type and values the
    /// device can't take
    pub fn set(&mut self, key: ConfigKey, value: &ConfigValue) -> Result<Applied, Error> {
        let applied = match key {
            ConfigKey::SampleRate => {
                let rate = typed(key, value.as_uint())?;
                self.samplerate = rate.clamp(
                    self.channel_mode.min_samplerate,
                    self.channel_mode.max_samplerate,
                );
                Applied::ResetCounter
            }
            ConfigKey::LimitSamples => {
                self.limit_samples = align_samples(typed(key, value.as_uint())?);
                self.limit_msec = 0;
                Applied::Stored
            }
            ConfigKey::LimitMsec => {
                self.limit_msec = typed(key, value.as_uint())?;
                self.limit_samples = 0;
                Applied::Stored
            }
            ConfigKey::OperationMode => {
                let code = typed(key, value.as_int())?;
                let mode = OperationMode::from_i64(code)
                    .ok_or_else(|| Error::unsupported(format!("operation mode {code}")))?;
                self.select_operation_mode(mode)?;
                Applied::Stored
            }
            ConfigKey::ChannelMode => {
                let id = typed(key, value.as_int())?;
                let mode = u16::try_from(id)
                    .ok()
                    .filter(|&id| self.profile.caps.supports_channel(id))
                    .and_then(channel_mode::by_id)
                    .ok_or_else(|| Error::unsupported(format!("channel mode {id}")))?;
                self.select_channel_mode(mode);
                Applied::Stored
            }
            ConfigKey::Vth => {
                let vth = typed(key, value.as_double())?;
                if !vth.is_finite() || vth < 0.0 {
                    return Err(Error::unsupported(format!("threshold {vth} V")));
                }
                self.vth = vth;
                Applied::Stored
            }
            ConfigKey::ClockEdge => {
                self.clock_falling_edge = typed(key, value.as_bool())?;
                Applied::Stored
            }
            ConfigKey::ExtTriggerMode => {
                let code = typed(key, value.as_int())?;
                self.ext_trigger_mode = EXT_TRIGGER_MODES
                    .iter()
                    .find(|e| i64::from(e.code) == code)
                    .and_then(|e| u16::try_from(e.code).ok())
                    .ok_or_else(|| Error::unsupported(format!("external trigger mode {code}")))?;
                Applied::Stored
            }
            ConfigKey::Filter => {
                self.filter = match typed(key, value.as_int())? {
                    0 => 0,
                    1 => 1,
                    f => return Err(Error::unsupported(format!("filter {f}"))),
                };
                Applied::Stored
            }
            ConfigKey::TriggerOut => {
                self.trigger_out = typed(key, value.as_bool())?;
                Applied::Stored
            }
            ConfigKey::Pwm0Enable | ConfigKey::Pwm1Enable => {
                let idx = usize::from(key == ConfigKey::Pwm1Enable);
                self.pwm[idx].enabled = typed(key, value.as_bool())?;
                Applied::PushPwm(idx)
            }
            ConfigKey::Pwm0Freq | ConfigKey::Pwm1Freq => {
                let idx = usize::from(key == ConfigKey::Pwm1Freq);
                self.pwm[idx].set_freq(typed(key, value.as_double())?)?;
                Applied::PushPwm(idx)
            }
            ConfigKey::Pwm0Duty | ConfigKey::Pwm1Duty => {
                let idx = usize::from(key == ConfigKey::Pwm1Duty);
                self.pwm[idx].set_duty(typed(key, value.as_double())?)?;
                Applied::PushPwm(idx)
            }
            ConfigKey::LoopMode => {
                self.loop_mode = typed(key, value.as_bool())?;
                Applied::Stored
            }
            ConfigKey::StreamBuffSize => {
                let gib = typed(key, value.as_double())?;
                if !gib.is_finite() || gib <= 0.0 {
                    return Err(Error::unsupported(format!("stream buffer {gib} GiB")));
                }
                self.stream_buff_size = gib;
                Applied::Stored
            }
            ConfigKey::TriggerPercent => {
                let pct = typed(key, value.as_uint())?;
                self.trigger.percent = u8::try_from(pct)
                    .ok()
                    .filter(|p| *p <= 100)
                    .ok_or_else(|| Error::unsupported(format!("trigger position {pct} %")))?;
                Applied::Stored
            }
            k => return Err(Error::unsupported(format!("{k:?} is read only"))),
        };
        debug!(?key, ?value, "Config set");
        Ok(applied)
    }

    fn select_operation_mode(&mut self, mode: OperationMode) -> Result<(), Error> {
        let caps = &self.profile.caps;
        let channel = if mode == OperationMode::InternalTest {
            Some(caps.intest_channel)
                .filter(|&id| caps.supports_channel(id))
                .and_then(channel_mode::by_id)
        } else {
            let stream = mode == OperationMode::Stream;
            caps.channel_modes().find(|m| m.stream == stream)
        }
        .ok_or_else(|| Error::unsupported(format!("operation mode {mode:?}")))?;
        self.operation_mode = mode;
        self.select_channel_mode(channel);
        Ok(())
    }

    /// Switch channel mode, rebuilding the probe list and pulling the sample rate into the new
    /// mode's bounds
    fn select_channel_mode(&mut self, mode: &'static ChannelMode) {
        self.channel_mode = mode;
        self.probes = probes(mode.num);
        self.samplerate = self
            .samplerate
            .clamp(mode.min_samplerate, mode.max_samplerate);
        if self.operation_mode != OperationMode::InternalTest {
            self.operation_mode = if mode.stream {
                OperationMode::Stream
            } else {
                OperationMode::Buffer
            };
        }
    }

    /// The values `key` can take
    /// # Errors
    /// Returns [`Error::Unsupported`] for keys without an option list
    pub fn list(&self, key: ConfigKey) -> Result<Vec<ConfigValue>, Error> {
        Ok(match key {
            ConfigKey::SampleRate => channel_mode::samplerates(self.channel_mode)
                .iter()
                .map(|&r| ConfigValue::Uint(r))
                .collect(),
            ConfigKey::OperationMode => items(&OPERATION_MODES, self.language),
            ConfigKey::Filter => items(&FILTERS, self.language),
            ConfigKey::ExtTriggerMode => items(&EXT_TRIGGER_MODES, self.language),
            ConfigKey::ChannelMode => self
                .profile
                .caps
                .channel_modes()
                .filter(|m| m.stream == self.stream())
                .map(|m| {
                    ConfigValue::Item(ListItem {
                        id: i32::from(m.id),
                        name: KString::from_static(m.name(self.language)),
                    })
                })
                .collect(),
            k => return Err(Error::unsupported(format!("no option list for {k:?}"))),
        })
    }
}

/// Map a displayed option name, in any language, back to its code
/// # Errors
/// Returns [`Error::Unsupported`] if `key` has no option list or no option is called `text`
pub fn option_code(key: ConfigKey, text: &str) -> Result<i32, Error> {
    let code = match key {
        ConfigKey::OperationMode => find_code(&OPERATION_MODES, text),
        ConfigKey::Filter => find_code(&FILTERS, text),
        ConfigKey::ExtTriggerMode => find_code(&EXT_TRIGGER_MODES, text),
        ConfigKey::ChannelMode => channel_mode::CHANNEL_MODES
            .iter()
            .find(|m| m.is_named(text))
            .map(|m| i32::from(m.id)),
        _ => None,
    };
    code.ok_or_else(|| Error::unsupported(format!("{key:?} option {text:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel_mode::{
            BUFFER_250X32,
            BUFFER_500X16,
            STREAM_125X16,
            STREAM_250X8,
        },
        core::{
            khz,
            mhz,
        },
        profile,
    };
    use paste::paste;

    fn plus() -> DeviceConfig {
        let p = profile::find(0x16C0, 0x05DC, UsbSpeed::Super, 2).unwrap();
        DeviceConfig::new(p, UsbSpeed::Super, Lang::En).unwrap()
    }

    #[test]
    fn test_defaults() {
        let cfg = plus();
        assert_eq!(cfg.channel_mode.id, BUFFER_500X16);
        assert_eq!(cfg.operation_mode, OperationMode::Buffer);
        assert_eq!(cfg.samplerate, mhz(500));
        assert_eq!(cfg.probes.len(), 16);
        assert_eq!(cfg.channel_enable_mask(), 0xFFFF);
        assert_eq!(cfg.probes[10].name.as_str(), "10");
        assert_eq!(cfg.pwm[0].freq_ticks, 125_000);
        assert_eq!(cfg.pwm[0].duty_ticks, 62_500);
        assert!(!cfg.pwm[1].enabled);
    }

    macro_rules! test_samplerate {
        ($name:ident, $set:expr, $got:expr) => {
            paste! {
                #[test]
                fn [<test_samplerate_ $name>]() {
                    let mut cfg = plus();
                    let applied = cfg.set(ConfigKey::SampleRate, &ConfigValue::Uint($set)).unwrap();
                    assert_eq!(applied, Applied::ResetCounter);
                    assert_eq!(cfg.get(ConfigKey::SampleRate).unwrap(), ConfigValue::Uint($got));
                }
            }
        };
    }

    test_samplerate!(in_range, mhz(100), mhz(100));
    test_samplerate!(min, khz(2), khz(2));
    test_samplerate!(max, mhz(500), mhz(500));
    test_samplerate!(below, 10, khz(2));
    test_samplerate!(above, mhz(1000), mhz(500));

    #[test]
    fn test_limits_exclusive() {
        let mut cfg = plus();
        cfg.set(ConfigKey::LimitSamples, &ConfigValue::Uint(1000)).unwrap();
        assert_eq!(cfg.limit_samples, 1024);
        cfg.set(ConfigKey::LimitMsec, &ConfigValue::Uint(20)).unwrap();
        assert_eq!(cfg.limit_samples, 0);
        assert_eq!(cfg.limit_msec, 20);
        cfg.set(ConfigKey::LimitSamples, &ConfigValue::Uint(64)).unwrap();
        assert_eq!(cfg.limit_msec, 0);
        assert_eq!(cfg.limit_samples, 64);
    }

    #[test]
    fn test_limit_alignment() {
        let mut cfg = plus();
        for n in [1, 63, 64, 65, 999_999, 1_000_000] {
            cfg.set(ConfigKey::LimitSamples, &ConfigValue::Uint(n)).unwrap();
            assert_eq!(cfg.limit_samples % 64, 0);
            assert!(cfg.limit_samples >= n);
        }
    }

    #[test]
    fn test_effective_limit() {
        let mut cfg = plus();
        cfg.set(ConfigKey::SampleRate, &ConfigValue::Uint(mhz(1))).unwrap();
        cfg.set(ConfigKey::LimitMsec, &ConfigValue::Uint(1)).unwrap();
        assert_eq!(cfg.effective_limit(), 1024);
    }

    #[test]
    fn test_operation_mode() {
        let mut cfg = plus();
        cfg.set(ConfigKey::OperationMode, &ConfigValue::Int(1)).unwrap();
        assert_eq!(cfg.channel_mode.id, STREAM_125X16);
        assert!(cfg.stream());
        assert_eq!(cfg.samplerate, mhz(125));
        assert_eq!(cfg.get(ConfigKey::Stream).unwrap(), ConfigValue::Bool(true));
        assert!(cfg
            .set(ConfigKey::OperationMode, &ConfigValue::Int(3))
            .is_err());
    }

    #[test]
    fn test_internal_test_mode() {
        // The test pattern runs in a 32 channel mode the 16 channel models lack
        let mut cfg = plus();
        assert!(matches!(
            cfg.set(ConfigKey::OperationMode, &ConfigValue::Int(2)),
            Err(Error::Unsupported(_))
        ));
        assert_eq!(cfg.operation_mode, OperationMode::Buffer);
        assert_eq!(cfg.channel_mode.id, BUFFER_500X16);
        assert_eq!(cfg.probes.len(), 16);

        let p = profile::find(0x16C0, 0x05DC, UsbSpeed::Super, 0).unwrap();
        let mut cfg = DeviceConfig::new(p, UsbSpeed::Super, Lang::En).unwrap();
        cfg.set(ConfigKey::OperationMode, &ConfigValue::Int(2)).unwrap();
        assert_eq!(cfg.channel_mode.id, BUFFER_250X32);
        assert_eq!(cfg.operation_mode, OperationMode::InternalTest);
        assert_eq!(cfg.probes.len(), 32);
    }

    #[test]
    fn test_channel_mode() {
        let mut cfg = plus();
        cfg.set_channel_enabled(3, false).unwrap();
        cfg.set(ConfigKey::ChannelMode, &ConfigValue::Int(i64::from(STREAM_250X8)))
            .unwrap();
        assert_eq!(cfg.operation_mode, OperationMode::Stream);
        assert_eq!(cfg.channel_enable_mask(), 0xFF);
        assert_eq!(cfg.samplerate, mhz(250));
        assert!(matches!(
            cfg.set(ConfigKey::ChannelMode, &ConfigValue::Int(i64::from(BUFFER_250X32))),
            Err(Error::Unsupported(_))
        ));
        assert!(cfg.set(ConfigKey::ChannelMode, &ConfigValue::Int(-1)).is_err());
    }

    #[test]
    fn test_wrong_type_and_read_only() {
        let mut cfg = plus();
        assert!(matches!(
            cfg.set(ConfigKey::SampleRate, &ConfigValue::Bool(true)),
            Err(Error::Unsupported(_))
        ));
        assert!(matches!(
            cfg.set(ConfigKey::HwDepth, &ConfigValue::Uint(1)),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn test_pwm() {
        let mut cfg = plus();
        let applied = cfg.set(ConfigKey::Pwm1Freq, &ConfigValue::Double(300_000.0)).unwrap();
        assert_eq!(applied, Applied::PushPwm(1));
        let pwm = cfg.pwm[1];
        assert_eq!(pwm.freq_ticks, 416);
        assert!((pwm.freq - 125e6 / 416.0).abs() < 1e-6);
        assert_eq!(pwm.duty_ticks, 208);
        cfg.set(ConfigKey::Pwm1Duty, &ConfigValue::Double(33.0)).unwrap();
        assert_eq!(cfg.pwm[1].duty_ticks, 137);
        assert!(cfg.set(ConfigKey::Pwm0Freq, &ConfigValue::Double(0.0)).is_err());
        assert!(cfg.set(ConfigKey::Pwm0Freq, &ConfigValue::Double(1.5e6)).is_err());
        assert!(cfg.set(ConfigKey::Pwm0Duty, &ConfigValue::Double(101.0)).is_err());
        cfg.set(ConfigKey::Pwm0Enable, &ConfigValue::Bool(true)).unwrap();
        assert_eq!(
            cfg.pwm[0].register_writes(0),
            [
                (regs::PWM0_ENABLE, 0),
                (regs::PWM0_PERIOD, 124_999),
                (regs::PWM0_DUTY, 62_499),
                (regs::PWM0_ENABLE, 1),
            ]
        );
    }

    #[test]
    fn test_filter_and_ext_trigger() {
        let mut cfg = plus();
        cfg.set(ConfigKey::Filter, &ConfigValue::Int(1)).unwrap();
        assert_eq!(cfg.filter, 1);
        assert!(cfg.set(ConfigKey::Filter, &ConfigValue::Int(2)).is_err());
        cfg.set(ConfigKey::ExtTriggerMode, &ConfigValue::Int(5)).unwrap();
        assert_eq!(cfg.ext_trigger_mode, 5);
        assert!(cfg.set(ConfigKey::ExtTriggerMode, &ConfigValue::Int(6)).is_err());
    }

    #[test]
    fn test_hw_depth() {
        let mut cfg = plus();
        // 2 Gbit over 16 channels
        assert_eq!(cfg.hw_depth(), (2 << 30) / 16);
        cfg.set(ConfigKey::OperationMode, &ConfigValue::Int(1)).unwrap();
        // 16 GiB of host buffer over 16 channels
        assert_eq!(cfg.hw_depth(), 16 * (1 << 30) * 8 / 16);
        assert_eq!(cfg.get(ConfigKey::ValidChannelCount).unwrap(), ConfigValue::Int(16));
        assert_eq!(cfg.get(ConfigKey::Usb30Support).unwrap(), ConfigValue::Bool(true));
    }

    #[test]
    fn test_lists() {
        let mut cfg = plus();
        let rates = cfg.list(ConfigKey::SampleRate).unwrap();
        assert_eq!(rates.first(), Some(&ConfigValue::Uint(khz(2))));
        assert_eq!(rates.last(), Some(&ConfigValue::Uint(mhz(500))));
        let modes = cfg.list(ConfigKey::ChannelMode).unwrap();
        assert_eq!(modes.len(), 1);
        cfg.language = Lang::Zh;
        let ops = cfg.list(ConfigKey::OperationMode).unwrap();
        assert_eq!(
            ops[1],
            ConfigValue::Item(ListItem {
                id: 1,
                name: "流模式".into()
            })
        );
        assert!(cfg.list(ConfigKey::Vth).is_err());
    }

    #[test]
    fn test_option_code() {
        assert_eq!(option_code(ConfigKey::OperationMode, "Stream Mode").unwrap(), 1);
        assert_eq!(option_code(ConfigKey::OperationMode, "流模式").unwrap(), 1);
        assert_eq!(option_code(ConfigKey::ExtTriggerMode, "Falling").unwrap(), 3);
        assert_eq!(option_code(ConfigKey::Filter, "1个采样时钟").unwrap(), 1);
        assert_eq!(
            option_code(ConfigKey::ChannelMode, "Use 16 Channels (Max 125MHz)").unwrap(),
            i32::from(STREAM_125X16)
        );
        assert!(option_code(ConfigKey::Filter, "Bogus").is_err());
        assert!(option_code(ConfigKey::Vth, "None").is_err());
    }
}
