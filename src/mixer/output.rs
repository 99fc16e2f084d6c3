//! Host audio output for the software mixer.
//!
//! The mixer renders into an SPSC ring from its upkeep hook; a dedicated
//! thread owns the cpal stream (streams are not `Send`) and the stream
//! callback drains the ring, emitting silence on underrun. Stream-build
//! failures are reported synchronously to the configure call that started
//! the output.

use crate::error::{Result, SonaraError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample};
use crossbeam_channel::{Sender, bounded};
use ringbuf::traits::{Consumer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::thread::JoinHandle;

pub(crate) struct OutputHandle {
    shutdown: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl OutputHandle {
    /// Stop playback and wait for the stream thread to exit.
    pub fn stop(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for OutputHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Open the default host output at the given format. Returns the producer
/// half of the transfer ring and a handle that stops the stream.
pub(crate) fn start_output(
    sample_rate: u32,
    channels: u16,
    ring_capacity: usize,
) -> Result<(HeapProd<f32>, OutputHandle)> {
    let ring = HeapRb::<f32>::new(ring_capacity);
    let (producer, consumer) = ring.split();

    let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
    let (result_tx, result_rx) = bounded::<Result<()>>(1);

    let thread = std::thread::spawn(move || {
        let stream = match build_default_stream(sample_rate, channels, consumer) {
            Ok(stream) => stream,
            Err(err) => {
                let _ = result_tx.send(Err(err));
                return;
            }
        };
        if let Err(err) = stream.play() {
            let _ = result_tx.send(Err(SonaraError::Backend(format!(
                "Failed to start stream: {err}"
            ))));
            return;
        }
        let _ = result_tx.send(Ok(()));

        // Keep the stream alive until shutdown; dropping it stops playback.
        let _ = shutdown_rx.recv();
        drop(stream);
    });

    match result_rx.recv() {
        Ok(Ok(())) => Ok((
            producer,
            OutputHandle {
                shutdown: shutdown_tx,
                thread: Some(thread),
            },
        )),
        Ok(Err(err)) => {
            let _ = thread.join();
            Err(err)
        }
        Err(_) => {
            let _ = thread.join();
            Err(SonaraError::Backend(
                "Output thread exited before reporting".to_owned(),
            ))
        }
    }
}

fn build_default_stream(
    sample_rate: u32,
    channels: u16,
    consumer: HeapCons<f32>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or_else(|| {
        SonaraError::Backend("No default output device available".to_owned())
    })?;

    let config = cpal::StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let default_config = device
        .default_output_config()
        .map_err(|e| SonaraError::Backend(format!("Failed to get default config: {e}")))?;

    match default_config.sample_format() {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, consumer),
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, consumer),
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, consumer),
        other => Err(SonaraError::AudioFormat(format!(
            "Unsupported output sample format {other:?}"
        ))),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut consumer: HeapCons<f32>,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                for sample in data.iter_mut() {
                    let value = consumer.try_pop().unwrap_or(0.0);
                    *sample = T::from_sample(value);
                }
            },
            move |err| {
                log::error!("Audio stream error: {err}");
            },
            None,
        )
        .map_err(|e| SonaraError::Backend(format!("Failed to build stream: {e}")))?;

    Ok(stream)
}
