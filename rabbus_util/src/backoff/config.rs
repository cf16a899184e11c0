use humantime::parse_duration;
use serde::de::{Error, IgnoredAny, MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::fmt::Formatter;
use std::time::Duration;

/// Defines a collection of fine-tune parameters for an
/// [exponential backoff](backoff::ExponentialBackoff) mechanism.
///
/// A fixed delay is the degenerate case of an exponential backoff with a
/// multiplier of `1.0` and no randomization, see [`BackoffConfig::fixed`].
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    pub(crate) initial_interval: Duration,
    pub(crate) max_interval: Duration,
    pub(crate) randomization_factor: f64,
    pub(crate) multiplier: f64,
    pub(crate) max_elapsed_time: Option<Duration>,
}

impl BackoffConfig {
    /// Creates a backoff definition that always waits for the same `delay`.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_interval: delay,
            max_interval: delay,
            randomization_factor: 0.0,
            multiplier: 1.0,
            max_elapsed_time: None,
        }
    }

    /// Re-creates this definition with the given initial interval.
    pub fn with_initial_interval(self, initial_interval: Duration) -> Self {
        Self {
            initial_interval,
            ..self
        }
    }

    /// Re-creates this definition with the given max interval.
    pub fn with_max_interval(self, max_interval: Duration) -> Self {
        Self {
            max_interval,
            ..self
        }
    }

    /// Re-creates this definition with the given randomization factor.
    pub fn with_randomization_factor(self, randomization_factor: f64) -> Self {
        Self {
            randomization_factor,
            ..self
        }
    }

    /// Re-creates this definition with the given multiplier.
    pub fn with_multiplier(self, multiplier: f64) -> Self {
        Self { multiplier, ..self }
    }

    /// Re-creates this definition with the given max elapsed time.
    pub fn with_max_elapsed_time(self, max_elapsed_time: Option<Duration>) -> Self {
        Self {
            max_elapsed_time,
            ..self
        }
    }
}

impl BackoffConfig {
    /// Exposes the
    /// [initial interval](backoff::ExponentialBackoffBuilder::with_initial_interval)
    /// of this backoff definition.
    pub fn initial_interval(&self) -> Duration {
        self.initial_interval
    }

    /// Exposes the
    /// [max interval](backoff::ExponentialBackoffBuilder::with_max_interval)
    /// of this backoff definition.
    pub fn max_interval(&self) -> Duration {
        self.max_interval
    }

    /// Exposes the
    /// [randomization factor](backoff::ExponentialBackoffBuilder::with_randomization_factor)
    /// of this backoff definition.
    pub fn randomization_factor(&self) -> f64 {
        self.randomization_factor
    }

    /// Exposes the
    /// [multiplier](backoff::ExponentialBackoffBuilder::with_multiplier)
    /// of this backoff definition.
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Exposes the
    /// [max elapsed time](backoff::ExponentialBackoffBuilder::with_max_elapsed_time)
    /// of this backoff definition.
    pub fn max_elapsed_time(&self) -> Option<Duration> {
        self.max_elapsed_time
    }
}

impl BackoffConfig {
    fn default_initial_interval() -> Duration {
        Duration::from_millis(500)
    }

    fn default_max_interval() -> Duration {
        Duration::from_secs(30)
    }

    fn default_randomization_factor() -> f64 {
        0.5
    }

    fn default_multiplier() -> f64 {
        2.0
    }

    fn default_max_elapsed_time() -> Option<Duration> {
        None
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_interval: Self::default_initial_interval(),
            max_interval: Self::default_max_interval(),
            randomization_factor: Self::default_randomization_factor(),
            multiplier: Self::default_multiplier(),
            max_elapsed_time: Self::default_max_elapsed_time(),
        }
    }
}

impl AsRef<BackoffConfig> for BackoffConfig {
    fn as_ref(&self) -> &BackoffConfig {
        self
    }
}

const _: () = {
    impl<'de> Deserialize<'de> for BackoffConfig {
        fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where
            D: Deserializer<'de>,
        {
            deserializer.deserialize_map(BackoffConfigVisitor)
        }
    }

    struct BackoffConfigVisitor;

    impl<'de> Visitor<'de> for BackoffConfigVisitor {
        type Value = BackoffConfig;

        fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
            formatter.write_str("a map of backoff configuration")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut fixed = None;
            let mut initial_interval = None;
            let mut max_interval = None;
            let mut randomization_factor = None;
            let mut multiplier = None;
            let mut max_elapsed_time = None;

            while let Some(key) = map.next_key()? {
                match key {
                    BackoffConfigField::Fixed => fixed = Some(next_duration(&mut map)?),
                    BackoffConfigField::InitialInterval => {
                        initial_interval = Some(next_duration(&mut map)?)
                    }
                    BackoffConfigField::MaxInterval => {
                        max_interval = Some(next_duration(&mut map)?)
                    }
                    BackoffConfigField::RandomizationFactor => {
                        randomization_factor = Some(map.next_value()?)
                    }
                    BackoffConfigField::Multiplier => multiplier = Some(map.next_value()?),
                    BackoffConfigField::MaxElapsedTime => {
                        max_elapsed_time = Some(next_duration(&mut map)?)
                    }
                    BackoffConfigField::Ignore => {
                        map.next_value::<IgnoredAny>()?;
                    }
                };
            }

            // A fixed delay wins over any exponential fine-tuning
            if let Some(delay) = fixed {
                return Ok(BackoffConfig::fixed(delay).with_max_elapsed_time(max_elapsed_time));
            }

            Ok(BackoffConfig {
                initial_interval: initial_interval
                    .unwrap_or_else(BackoffConfig::default_initial_interval),
                max_interval: max_interval.unwrap_or_else(BackoffConfig::default_max_interval),
                randomization_factor: randomization_factor
                    .unwrap_or_else(BackoffConfig::default_randomization_factor),
                multiplier: multiplier.unwrap_or_else(BackoffConfig::default_multiplier),
                max_elapsed_time: max_elapsed_time
                    .or_else(BackoffConfig::default_max_elapsed_time),
            })
        }
    }

    fn next_duration<'de, A>(map: &mut A) -> Result<Duration, A::Error>
    where
        A: MapAccess<'de>,
    {
        let duration_string = map.next_value::<String>()?;

        parse_duration(&duration_string).map_err(Error::custom)
    }

    #[derive(Deserialize)]
    #[serde(field_identifier, rename_all = "snake_case")]
    enum BackoffConfigField {
        #[serde(alias = "delay", alias = "sleep")]
        Fixed,
        #[serde(alias = "initial")]
        InitialInterval,
        #[serde(alias = "max")]
        MaxInterval,
        #[serde(alias = "jitter", alias = "randomization")]
        RandomizationFactor,
        Multiplier,
        #[serde(alias = "max_elapsed")]
        MaxElapsedTime,
        #[serde(other)]
        Ignore,
    }
};
