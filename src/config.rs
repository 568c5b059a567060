//! Runtime configuration.

use std::{str::FromStr, time::Duration};

const INTERVAL_KEY: &str = "PARBAR_INTERVAL_MS";
const WIDTH_KEY: &str = "PARBAR_WIDTH";

/// The minimum width of a rendered progress line.
pub const MIN_TERMINAL_WIDTH: usize = 90;

/// The default interval between two redraws.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration of a [`Context`](crate::Context) and its terminal presentation.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Config {
    /// The interval at which the collector wakes up and redraws.
    pub interval: Duration,
    /// A fixed terminal width, or `None` to detect it.
    pub width: Option<usize>,
}

impl Default for Config {
    /// Returns a config with following default values:
    ///
    /// - `interval: 100ms`,
    /// - `width: None`,
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            width: None,
        }
    }
}

impl Config {
    /// Builder-style method for setting the refresh interval.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Builder-style method for fixing the terminal width.
    pub fn width(mut self, width: usize) -> Self {
        self.width = Some(width);
        self
    }

    /// Returns the default config with environment overrides applied.
    ///
    /// # Environment
    ///
    /// ```terminal
    /// PARBAR_INTERVAL_MS=[milliseconds]
    /// PARBAR_WIDTH=[columns]
    /// ```
    ///
    /// Unrecognized values are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(millis) = parse::<u64>(INTERVAL_KEY, lookup(INTERVAL_KEY)) {
            config.interval = Duration::from_millis(millis);
        }

        config.width = parse::<usize>(WIDTH_KEY, lookup(WIDTH_KEY));

        config
    }

    /// Returns the width progress lines get rendered at.
    ///
    /// Either the fixed width or the detected terminal width (minus one column),
    /// but never less than [`MIN_TERMINAL_WIDTH`]. Falls back to the minimum
    /// if there is no terminal to detect.
    pub fn resolve_width(&self) -> usize {
        self.width
            .or_else(detect_width)
            .unwrap_or(MIN_TERMINAL_WIDTH)
            .max(MIN_TERMINAL_WIDTH)
    }
}

fn detect_width() -> Option<usize> {
    use terminal_size::{terminal_size, Width};

    terminal_size().map(|(Width(columns), _)| usize::from(columns).saturating_sub(1))
}

fn parse<T: FromStr>(key: &str, value: Option<String>) -> Option<T> {
    let value = value?;

    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                env_key = key,
                value = ?value,
                "Unrecognized value for environment variable. Using default."
            );
            #[cfg(not(feature = "tracing"))]
            let _ = key;
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_environment() {
        let config = Config::from_lookup(|_| None);

        assert_eq!(config, Config::default());
        assert_eq!(config.interval, Duration::from_millis(100));
    }

    #[test]
    fn environment_overrides() {
        let config = Config::from_lookup(|key| match key {
            INTERVAL_KEY => Some("250".to_owned()),
            WIDTH_KEY => Some(" 120 ".to_owned()),
            _ => None,
        });

        assert_eq!(config.interval, Duration::from_millis(250));
        assert_eq!(config.width, Some(120));
        assert_eq!(config.resolve_width(), 120);
    }

    #[test]
    fn unrecognized_values_are_ignored() {
        let config = Config::from_lookup(|_| Some("lots".to_owned()));

        assert_eq!(config, Config::default());
    }

    #[test]
    fn width_never_below_minimum() {
        assert_eq!(Config::default().width(10).resolve_width(), MIN_TERMINAL_WIDTH);
        assert!(Config::default().resolve_width() >= MIN_TERMINAL_WIDTH);
    }
}
