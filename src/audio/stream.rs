//! cpal input/output streams driving the pipeline
//!
//! Streams are created and owned by a dedicated thread (cpal streams are not
//! `Send` on every host). Startup errors are reported back synchronously so
//! `start` fails if a device cannot be acquired.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, SizedSample, StreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::device::{input_device, output_device};
use super::pipeline::AudioPipeline;
use crate::config::AudioConfig;
use crate::error::AudioError;

/// Collects device-sized input chunks into fixed-size frames
pub struct FrameAssembler {
    frame: Vec<i16>,
    block: usize,
}

impl FrameAssembler {
    /// Assembler emitting frames of `block` interleaved samples
    pub fn new(block: usize) -> Self {
        Self {
            frame: Vec::with_capacity(block),
            block: block.max(1),
        }
    }

    /// Feed samples; `emit` runs once per completed frame
    pub fn push<I, F>(&mut self, samples: I, mut emit: F)
    where
        I: IntoIterator<Item = i16>,
        F: FnMut(&[i16]),
    {
        for sample in samples {
            self.frame.push(sample);
            if self.frame.len() == self.block {
                emit(&self.frame);
                self.frame.clear();
            }
        }
    }

    /// Samples waiting for the next frame
    pub fn pending(&self) -> usize {
        self.frame.len()
    }
}

fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// Running capture + playback streams
pub struct AudioStreams {
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Receiver<AudioError>,
}

impl AudioStreams {
    /// Open the configured devices and start both streams
    pub fn start(config: &AudioConfig, pipeline: Arc<AudioPipeline>) -> Result<Self, AudioError> {
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let (error_tx, error_rx) = bounded::<AudioError>(16);

        let thread_config = config.clone();
        let running_for_loop = running.clone();

        let handle = thread::Builder::new()
            .name("audio-io".to_string())
            .spawn(move || {
                let streams = match open_streams(&thread_config, pipeline, error_tx) {
                    Ok(streams) => streams,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }

                // Streams stop when dropped here
                drop(streams);
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(AudioError::StreamError("audio thread exited during startup".into()));
            }
        }

        tracing::info!(
            "Audio started: {}Hz, {} channel(s), {} frames/block",
            config.sample_rate,
            config.channels,
            config.frames_per_block
        );

        Ok(Self {
            running,
            thread_handle: Some(handle),
            error_rx,
        })
    }

    /// Stop both streams. Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::info!("Audio stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Next asynchronous stream error, if any
    pub fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.try_recv().ok()
    }
}

impl Drop for AudioStreams {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_streams(
    config: &AudioConfig,
    pipeline: Arc<AudioPipeline>,
    error_tx: Sender<AudioError>,
) -> Result<(cpal::Stream, cpal::Stream), AudioError> {
    let input = input_device(config.input_device.as_deref())?;
    let output = output_device(config.output_device.as_deref())?;

    let input_format = input.default_input_config()?.sample_format();
    let output_format = output.default_output_config()?.sample_format();

    let input_stream = match input_format {
        SampleFormat::F32 => {
            build_input::<f32>(&input, config, pipeline.clone(), error_tx.clone(), f32_to_i16)?
        }
        SampleFormat::I16 => {
            build_input::<i16>(&input, config, pipeline.clone(), error_tx.clone(), |s| s)?
        }
        other => return Err(AudioError::UnsupportedFormat(format!("input {:?}", other))),
    };
    let output_stream = match output_format {
        SampleFormat::F32 => build_output::<f32>(&output, config, pipeline, error_tx, i16_to_f32)?,
        SampleFormat::I16 => build_output::<i16>(&output, config, pipeline, error_tx, |s| s)?,
        other => return Err(AudioError::UnsupportedFormat(format!("output {:?}", other))),
    };

    input_stream.play()?;
    output_stream.play()?;
    Ok((input_stream, output_stream))
}

fn stream_config(config: &AudioConfig, fixed: bool) -> StreamConfig {
    StreamConfig {
        channels: config.channels,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: if fixed {
            cpal::BufferSize::Fixed(config.frames_per_block as u32)
        } else {
            cpal::BufferSize::Default
        },
    }
}

fn build_input<T>(
    device: &cpal::Device,
    config: &AudioConfig,
    pipeline: Arc<AudioPipeline>,
    error_tx: Sender<AudioError>,
    convert: fn(T) -> i16,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + Send + 'static,
{
    let block = config.samples_per_block();
    let build = |fixed: bool| {
        let pipeline = pipeline.clone();
        let error_tx = error_tx.clone();
        let mut assembler = FrameAssembler::new(block);
        device.build_input_stream(
            &stream_config(config, fixed),
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                assembler.push(data.iter().map(|&s| convert(s)), |frame| {
                    pipeline.capture_tick(frame)
                });
            },
            move |err| {
                let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
            },
            None,
        )
    };

    // Hosts that cannot honor a fixed block size still get whole frames
    // through the assembler
    match build(true) {
        Ok(stream) => Ok(stream),
        Err(e) => {
            tracing::debug!("Fixed input buffer rejected ({}), using device default", e);
            Ok(build(false)?)
        }
    }
}

fn build_output<T>(
    device: &cpal::Device,
    config: &AudioConfig,
    pipeline: Arc<AudioPipeline>,
    error_tx: Sender<AudioError>,
    convert: fn(i16) -> T,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + Send + 'static,
{
    let block = config.samples_per_block();
    let build = |fixed: bool| {
        let pipeline = pipeline.clone();
        let error_tx = error_tx.clone();
        let mut mixed: Vec<i16> = Vec::with_capacity(block);
        device.build_output_stream(
            &stream_config(config, fixed),
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                mixed.resize(data.len(), 0);
                pipeline.playback_tick(&mut mixed);
                for (dst, &src) in data.iter_mut().zip(mixed.iter()) {
                    *dst = convert(src);
                }
            },
            move |err| {
                let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
            },
            None,
        )
    };

    match build(true) {
        Ok(stream) => Ok(stream),
        Err(e) => {
            tracing::debug!("Fixed output buffer rejected ({}), using device default", e);
            Ok(build(false)?)
        }
    }
}
