//! Demodulation via an external DAB decoder process
//!
//! The decoder consumes raw IQ samples on stdin and prints one record per
//! line on stdout: the ensemble description while the multiplex is being
//! acquired, then the payload units of its data services:
//!
//! ```text
//! ensemble 0x10bc BR Bayern
//! service 0xe0d210ab data 59
//! complete
//! data 0xe0d210ab 45000026...
//! ```
//!
//! A feeder thread copies sample chunks into the process and a reader
//! thread parses its output into the record channel.

use std::io::{BufRead, BufReader, Write};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use tracing::{debug, info, warn};

use super::StageHandle;
use crate::ensemble::{EnsembleRecord, ServiceInfo, ServiceKind};

/// Records buffered between the reader thread and the update loop.
const RECORD_QUEUE_DEPTH: usize = 256;

/// How long the feeder waits for samples before rechecking its stop flag.
const FEED_POLL: Duration = Duration::from_millis(500);

/// Decoder process configuration.
#[derive(Debug, Clone)]
pub struct DemodConfig {
    pub decoder_path: String,
    /// DAB transmission mode, 1 for band III.
    pub mode: u8,
}

impl Default for DemodConfig {
    fn default() -> Self {
        Self {
            decoder_path: "dab-decode".to_string(),
            mode: 1,
        }
    }
}

/// Demodulation stage.
pub struct Demodulator;

impl Demodulator {
    /// Start the decoder process and return the stage handle plus the
    /// record channel.
    pub fn start(
        config: DemodConfig,
        samples: Receiver<Vec<u8>>,
    ) -> Result<(StageHandle, Receiver<EnsembleRecord>)> {
        info!(
            "starting decoder {} in transmission mode {}",
            config.decoder_path, config.mode
        );

        let mut child = Command::new(&config.decoder_path)
            .arg("-m")
            .arg(config.mode.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn {}", config.decoder_path))?;

        let mut stdin = child
            .stdin
            .take()
            .context("failed to open the decoder's sample input")?;
        let stdout = child
            .stdout
            .take()
            .context("failed to capture the decoder's record output")?;

        if let Some(stderr) = child.stderr.take() {
            thread::spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                    if !line.trim().is_empty() {
                        info!("[decoder] {}", line.trim());
                    }
                }
            });
        }

        let running = Arc::new(AtomicBool::new(true));
        let (record_tx, record_rx) = bounded::<EnsembleRecord>(RECORD_QUEUE_DEPTH);

        let feeder_flag = running.clone();
        let feeder = thread::Builder::new()
            .name("decoder-feed".to_string())
            .spawn(move || {
                while feeder_flag.load(Ordering::SeqCst) {
                    match samples.recv_timeout(FEED_POLL) {
                        Ok(chunk) => {
                            if let Err(error) = stdin.write_all(&chunk) {
                                warn!("decoder stopped taking samples: {error}");
                                break;
                            }
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                // Dropping stdin signals end of samples to the decoder
            })
            .context("failed to spawn the decoder feed thread")?;

        let reader_flag = running.clone();
        let reader = thread::Builder::new()
            .name("decoder-read".to_string())
            .spawn(move || {
                let mut skipped = 0u64;
                for line in BufReader::new(stdout).lines() {
                    if !reader_flag.load(Ordering::SeqCst) {
                        break;
                    }
                    let line = match line {
                        Ok(line) => line,
                        Err(error) => {
                            warn!("error reading decoder output: {error}");
                            break;
                        }
                    };
                    match parse_record(&line) {
                        Some(record) => {
                            if record_tx.send(record).is_err() {
                                debug!("record consumer is gone, stopping the reader");
                                break;
                            }
                        }
                        None => {
                            if !line.trim().is_empty() {
                                skipped += 1;
                                debug!("unparseable decoder line: {line}");
                            }
                        }
                    }
                }
                let _ = child.kill();
                info!("decoder stopped, {skipped} unparseable lines skipped");
            })
            .context("failed to spawn the decoder read thread")?;

        Ok((
            StageHandle::new("decoder", running, vec![feeder, reader]),
            record_rx,
        ))
    }
}

/// Parse one decoder output line. Returns `None` for lines that are not
/// records, such as banners.
fn parse_record(line: &str) -> Option<EnsembleRecord> {
    let mut tokens = line.split_whitespace();
    match tokens.next()? {
        "ensemble" => {
            let id = parse_id(tokens.next()?)? as u16;
            let label = tokens.collect::<Vec<_>>().join(" ");
            Some(EnsembleRecord::Ensemble { id, label })
        }
        "service" => {
            let id = parse_id(tokens.next()?)?;
            let kind = match tokens.next()? {
                "audio" => ServiceKind::Audio,
                "data" => ServiceKind::Data,
                _ => return None,
            };
            let component_type = tokens.next()?.parse().ok()?;
            if tokens.next().is_some() {
                return None;
            }
            Some(EnsembleRecord::Service(ServiceInfo {
                id,
                kind,
                component_type,
            }))
        }
        "complete" => tokens.next().is_none().then_some(EnsembleRecord::Complete),
        "data" => {
            let service = parse_id(tokens.next()?)?;
            let payload = hex::decode(tokens.next()?).ok()?;
            if tokens.next().is_some() {
                return None;
            }
            Some(EnsembleRecord::Data { service, payload })
        }
        _ => None,
    }
}

fn parse_id(token: &str) -> Option<u32> {
    match token.strip_prefix("0x") {
        Some(hexadecimal) => u32::from_str_radix(hexadecimal, 16).ok(),
        None => token.parse().ok(),
    }
}
