//! Configuration loaded from environment variables

use crate::sdr::{CaptureConfig, DemodConfig};

/// Receive daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Requested tunnel interface name (the kernel has the last word)
    pub tun_name: String,

    /// Sample acquisition settings
    pub capture: CaptureConfig,

    /// Decoder process settings
    pub decoder: DemodConfig,
}

impl Config {
    /// Load configuration from environment variables, falling back to the
    /// defaults of a band III receiver.
    pub fn from_env() -> Self {
        let mut capture = CaptureConfig::default();
        if let Ok(path) = std::env::var("RTL_SDR_PATH") {
            capture.rtl_sdr_path = path;
        }
        capture.device_index = env_parsed("DEVICE_INDEX").unwrap_or(capture.device_index);
        capture.center_freq_hz = env_parsed("CENTER_FREQ_HZ").unwrap_or(capture.center_freq_hz);
        capture.sample_rate = env_parsed("SAMPLE_RATE").unwrap_or(capture.sample_rate);
        capture.gain = env_parsed("TUNER_GAIN_TENTHS_DB").or(capture.gain);
        capture.ppm_error = env_parsed("PPM_ERROR").unwrap_or(capture.ppm_error);

        let mut decoder = DemodConfig::default();
        if let Ok(path) = std::env::var("DAB_DECODER_PATH") {
            decoder.decoder_path = path;
        }
        decoder.mode = env_parsed("TRANSMISSION_MODE").unwrap_or(decoder.mode);

        Self {
            tun_name: std::env::var("TUN_NAME").unwrap_or_else(|_| "dabdata".to_string()),
            capture,
            decoder,
        }
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|value| value.parse().ok())
}
