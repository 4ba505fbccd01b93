//! # Sample Rate Conversion
//!
//! Streaming sinc resampling with rubato. Sound cards rarely run at the
//! rates the voice service speaks (16 kHz up, 24 kHz down), so the device
//! backends convert on the way in and on the way out.
//!
//! The resampler works on planar audio (one `Vec<f32>` per channel). Input
//! is buffered until rubato's fixed chunk is full; the filter delay is
//! trimmed from the front so output lines up with input.

use rubato::{
    Resampler as RubatoResampler, SincFixedIn, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResampleError {
    #[error("invalid resampler config: {0}")]
    InvalidConfig(String),

    #[error("resampling failed: {0}")]
    Failed(String),
}

pub struct Resampler {
    source_rate: u32,
    target_rate: u32,
    channels: usize,
    inner: Option<SincFixedIn<f32>>,
    pending: Vec<Vec<f32>>,
    /// Output frames still owed to the filter delay.
    skip: usize,
}

impl Resampler {
    pub fn new(source_rate: u32, target_rate: u32, channels: usize) -> Result<Self, ResampleError> {
        if source_rate == 0 || target_rate == 0 {
            return Err(ResampleError::InvalidConfig("sample rate cannot be zero".to_string()));
        }
        if channels == 0 {
            return Err(ResampleError::InvalidConfig("channel count cannot be zero".to_string()));
        }

        let inner = if source_rate != target_rate {
            Some(Self::create(source_rate, target_rate, channels)?)
        } else {
            None
        };
        let skip = inner.as_ref().map(|r| r.output_delay()).unwrap_or(0);

        Ok(Self {
            source_rate,
            target_rate,
            channels,
            inner,
            pending: vec![Vec::new(); channels],
            skip,
        })
    }

    fn create(source_rate: u32, target_rate: u32, channels: usize) -> Result<SincFixedIn<f32>, ResampleError> {
        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };
        // 20ms of input per rubato chunk.
        let chunk_size = (source_rate as usize / 50).max(1);

        SincFixedIn::<f32>::new(
            target_rate as f64 / source_rate as f64,
            2.0,
            params,
            chunk_size,
            channels,
        )
        .map_err(|e| ResampleError::InvalidConfig(format!("{:?}", e)))
    }

    pub fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }

    /// Feed planar input and return whatever output is ready.
    pub fn process(&mut self, input: &[Vec<f32>]) -> Result<Vec<Vec<f32>>, ResampleError> {
        self.check_channels(input)?;
        let Some(inner) = self.inner.as_mut() else {
            return Ok(input.to_vec());
        };

        for (pending, channel) in self.pending.iter_mut().zip(input) {
            pending.extend_from_slice(channel);
        }

        let mut output = vec![Vec::new(); self.channels];
        while self.pending[0].len() >= inner.input_frames_next() {
            let needed = inner.input_frames_next();
            let chunk: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|pending| pending.drain(..needed).collect())
                .collect();
            let produced = inner
                .process(chunk.as_slice(), None)
                .map_err(|e| ResampleError::Failed(format!("{:?}", e)))?;
            append(&mut output, produced);
        }
        self.trim_delay(&mut output);
        Ok(output)
    }

    /// Resample one complete buffer, flushing the filter so the result has
    /// exactly `frames * target / source` frames.
    pub fn process_all(&mut self, input: &[Vec<f32>]) -> Result<Vec<Vec<f32>>, ResampleError> {
        if self.inner.is_none() {
            self.check_channels(input)?;
            return Ok(input.to_vec());
        }
        let frames = input.first().map(Vec::len).unwrap_or(0);
        let expected =
            (frames as f64 * self.target_rate as f64 / self.source_rate as f64).round() as usize;

        let mut output = self.process(input)?;
        let Some(inner) = self.inner.as_mut() else {
            return Ok(output);
        };

        // The partial call zero-pads the tail; later ones drain the delay line.
        let mut tail = std::mem::replace(&mut self.pending, vec![Vec::new(); self.channels]);
        let mut rounds = 0;
        while output[0].len() < expected && rounds < 8 {
            let mut produced = inner
                .process_partial(Some(tail.as_slice()), None)
                .map_err(|e| ResampleError::Failed(format!("{:?}", e)))?;
            let skip = self.skip.min(produced[0].len());
            for channel in produced.iter_mut() {
                channel.drain(..skip);
            }
            self.skip -= skip;
            append(&mut output, produced);
            tail = vec![Vec::new(); self.channels];
            rounds += 1;
        }

        for channel in output.iter_mut() {
            channel.resize(expected, 0.0);
        }
        Ok(output)
    }

    fn check_channels(&self, input: &[Vec<f32>]) -> Result<(), ResampleError> {
        if input.len() != self.channels {
            return Err(ResampleError::Failed(format!(
                "expected {} channels, got {}",
                self.channels,
                input.len()
            )));
        }
        Ok(())
    }

    fn trim_delay(&mut self, output: &mut [Vec<f32>]) {
        let skip = self.skip.min(output.first().map(Vec::len).unwrap_or(0));
        if skip == 0 {
            return;
        }
        for channel in output.iter_mut() {
            channel.drain(..skip);
        }
        self.skip -= skip;
    }
}

fn append(output: &mut [Vec<f32>], produced: Vec<Vec<f32>>) {
    for (out, channel) in output.iter_mut().zip(produced) {
        out.extend(channel);
    }
}
