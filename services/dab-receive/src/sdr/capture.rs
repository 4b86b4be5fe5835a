//! Sample acquisition via an rtl_sdr process
//!
//! Spawns rtl_sdr tuned to the DAB block and streams its raw IQ output
//! into the sample channel in large chunks.

use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, error, info, warn};

use super::StageHandle;

/// IQ bytes read from the capture process per chunk.
const CHUNK_SIZE: usize = 256 * 1024 * 2;

/// Chunks buffered between acquisition and demodulation.
const SAMPLE_QUEUE_DEPTH: usize = 16;

/// Capture process configuration.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub rtl_sdr_path: String,
    pub device_index: u32,
    pub center_freq_hz: u32,
    pub sample_rate: u32,
    /// Tuner gain in tenths of dB; `None` leaves automatic gain control on.
    pub gain: Option<i32>,
    pub ppm_error: i32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            rtl_sdr_path: "rtl_sdr".to_string(),
            device_index: 0,
            center_freq_hz: 218_640_000, // DAB block 11D
            sample_rate: 2_048_000,
            gain: None,
            ppm_error: 0,
        }
    }
}

/// Sample acquisition stage.
pub struct SampleCapture;

impl SampleCapture {
    /// Start capturing and return the stage handle plus the sample channel.
    pub fn start(config: CaptureConfig) -> Result<(StageHandle, Receiver<Vec<u8>>)> {
        info!(
            "starting sample capture: device {} at {} MHz, {} MSPS",
            config.device_index,
            config.center_freq_hz as f64 / 1e6,
            config.sample_rate as f64 / 1e6,
        );

        let (sample_tx, sample_rx) = bounded::<Vec<u8>>(SAMPLE_QUEUE_DEPTH);
        let running = Arc::new(AtomicBool::new(true));

        let worker = running.clone();
        let thread = thread::Builder::new()
            .name("sample-capture".to_string())
            .spawn(move || {
                if let Err(error) = run_capture(config, worker, sample_tx) {
                    error!("sample capture error: {error:#}");
                }
            })
            .context("failed to spawn the sample capture thread")?;

        Ok((StageHandle::new("sample-capture", running, vec![thread]), sample_rx))
    }
}

fn run_capture(
    config: CaptureConfig,
    running: Arc<AtomicBool>,
    sample_tx: Sender<Vec<u8>>,
) -> Result<()> {
    let mut command = Command::new(&config.rtl_sdr_path);
    command
        .arg("-d")
        .arg(config.device_index.to_string())
        .arg("-f")
        .arg(config.center_freq_hz.to_string())
        .arg("-s")
        .arg(config.sample_rate.to_string());
    if let Some(gain) = config.gain {
        command.arg("-g").arg(format!("{:.1}", gain as f32 / 10.0));
    }
    if config.ppm_error != 0 {
        command.arg("-p").arg(config.ppm_error.to_string());
    }
    // "-" streams samples to stdout
    command.arg("-").stdout(Stdio::piped()).stderr(Stdio::piped());

    let mut child = command
        .spawn()
        .with_context(|| format!("failed to spawn {}", config.rtl_sdr_path))?;

    let mut stdout = child
        .stdout
        .take()
        .context("failed to capture the sample stream")?;

    if let Some(stderr) = child.stderr.take() {
        thread::spawn(move || {
            let reader = std::io::BufReader::new(stderr);
            for line in std::io::BufRead::lines(reader).map_while(Result::ok) {
                if !line.trim().is_empty() {
                    info!("[rtl_sdr] {}", line.trim());
                }
            }
        });
    }

    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut bytes_captured = 0u64;
    let mut dropped_chunks = 0u64;
    let mut last_stats = Instant::now();
    let mut first_data = true;

    while running.load(Ordering::SeqCst) {
        match stdout.read(&mut buffer) {
            Ok(0) => {
                warn!("capture process closed its sample stream");
                break;
            }
            Ok(read) => {
                if first_data {
                    info!("first IQ data received ({read} bytes)");
                    first_data = false;
                }
                bytes_captured += read as u64;

                if sample_tx.try_send(buffer[..read].to_vec()).is_err() {
                    dropped_chunks += 1;
                    debug!("sample queue full, dropping chunk");
                }

                if last_stats.elapsed() >= Duration::from_secs(5) {
                    let rate = bytes_captured as f64 / 2.0 / last_stats.elapsed().as_secs_f64();
                    info!(
                        "[capture] rate: {:.2} MSPS, dropped chunks: {dropped_chunks}",
                        rate / 1e6
                    );
                    bytes_captured = 0;
                    last_stats = Instant::now();
                }
            }
            Err(error) => {
                error!("error reading from the capture process: {error}");
                thread::sleep(Duration::from_millis(100));
            }
        }
    }

    let _ = child.kill();
    info!("sample capture stopped");
    Ok(())
}
