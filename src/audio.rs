//! Real-time audio output using cpal.
//! Works with JACK, ALSA, OpenSL ES (Android/Termux), etc.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{error, info};

use crate::output::Sink;

/// Queued frames above which the feeding thread blocks; about half a
/// second at 48 kHz.
const HIGH_WATER: usize = 24000;

struct Shared {
    /// Mono frames, already folded down from the render channels.
    frames: VecDeque<f32>,
}

/// An open output stream fed from a shared frame queue. The render loop
/// pushes blocks through [`DeviceSink`]; the callback drains them.
pub struct AudioOutput {
    sample_rate: u32,
    shared: Arc<Mutex<Shared>>,
    _stream: cpal::Stream,
}

impl AudioOutput {
    pub fn new() -> Result<AudioOutput, String> {
        let host = cpal::default_host();
        info!("audio host: {:?}", host.id());

        let device = host
            .default_output_device()
            .ok_or("no audio output device found")?;
        info!(
            "audio device: {}",
            device.name().map_err(|e| e.to_string())?
        );

        let config = device
            .default_output_config()
            .map_err(|e| format!("no default output config: {e}"))?;
        info!("audio config: {:?}", config);

        let sample_rate = config.sample_rate().0;
        let channels = config.channels() as usize;
        let shared = Arc::new(Mutex::new(Shared {
            frames: VecDeque::new(),
        }));
        let shared_cb = shared.clone();

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => {
                Self::build_stream::<f32>(&device, &config.into(), shared_cb, channels)
            }
            cpal::SampleFormat::I16 => {
                Self::build_stream::<i16>(&device, &config.into(), shared_cb, channels)
            }
            cpal::SampleFormat::U16 => {
                Self::build_stream::<u16>(&device, &config.into(), shared_cb, channels)
            }
            _ => return Err("unsupported sample format".to_string()),
        }?;

        stream.play().map_err(|e| e.to_string())?;
        info!("audio stream started at {} Hz", sample_rate);

        Ok(AudioOutput {
            sample_rate,
            shared,
            _stream: stream,
        })
    }

    fn build_stream<T>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        shared: Arc<Mutex<Shared>>,
        channels: usize,
    ) -> Result<cpal::Stream, String>
    where
        T: cpal::SizedSample + cpal::FromSample<f32>,
    {
        device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    let mut shared = shared.lock().unwrap();
                    for frame in data.chunks_mut(channels) {
                        let s = shared.frames.pop_front().unwrap_or(0.0);
                        for channel in frame.iter_mut() {
                            *channel = T::from_sample(s);
                        }
                    }
                },
                |err| error!("audio stream error: {}", err),
                None,
            )
            .map_err(|e| e.to_string())
    }

    /// The device's sample rate; render at this rate to play unresampled.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// A sink that feeds this output, folding `channels`-channel frames
    /// down to mono for the device fan-out.
    pub fn sink(&self, channels: u16) -> DeviceSink {
        DeviceSink {
            shared: self.shared.clone(),
            channels,
        }
    }

    /// Block until everything queued has been played out.
    pub fn drain(&self) {
        loop {
            let queued = self.shared.lock().unwrap().frames.len();
            if queued == 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        // One more callback period for the tail.
        std::thread::sleep(Duration::from_millis(100));
    }
}

pub struct DeviceSink {
    shared: Arc<Mutex<Shared>>,
    channels: u16,
}

impl Sink for DeviceSink {
    fn write_s16(&mut self, interleaved: &[i16], _frames: u32) -> Result<(), String> {
        // The device is the one blocking boundary in the pipeline.
        loop {
            let queued = self.shared.lock().unwrap().frames.len();
            if queued < HIGH_WATER {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        let mut shared = self.shared.lock().unwrap();
        match self.channels {
            1 => {
                for &s in interleaved {
                    shared.frames.push_back(s as f32 / 32768.0);
                }
            }
            _ => {
                for pair in interleaved.chunks(2) {
                    let l = pair[0] as f32 / 32768.0;
                    let r = pair.get(1).copied().unwrap_or(0) as f32 / 32768.0;
                    shared.frames.push_back((l + r) * 0.5);
                }
            }
        }
        Ok(())
    }
}
