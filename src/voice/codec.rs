//! Audio encoding, decoding, and resampling

use std::io::Cursor;

use rubato::{FastFixedIn, PolynomialDegree, Resampler};

use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Frames fed to the resampler per call
const RESAMPLE_CHUNK: usize = 1024;

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            // Convert f32 [-1.0, 1.0] to i16
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

/// Decode MP3 bytes to mono f32 samples and their sample rate
///
/// # Errors
///
/// Returns error if the stream is not valid MP3
pub fn decode_mp3(mp3_data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0_u32;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = u32::try_from(frame.sample_rate).unwrap_or(sample_rate);

                if frame.channels == 2 {
                    // Stereo: average channels
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            // ID3 tags and junk between frames
            Err(minimp3::Error::SkippedData) => {}
            Err(minimp3::Error::Eof | minimp3::Error::InsufficientData) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    Ok((samples, sample_rate))
}

/// Resampling ratio that converts `source_rate` audio for a `target_rate`
/// device while raising the pitch by `pitch`
///
/// Pitch is applied by playing fewer samples at the same rate, so it also
/// changes tempo.
#[must_use]
pub fn playback_ratio(source_rate: u32, target_rate: u32, pitch: f64) -> f64 {
    if source_rate == 0 || pitch <= 0.0 {
        return 1.0;
    }
    f64::from(target_rate) / (f64::from(source_rate) * pitch)
}

/// Resample mono `samples` by `ratio` (output rate / input rate)
///
/// # Errors
///
/// Returns error if the resampler rejects the ratio
pub fn resample(samples: &[f32], ratio: f64) -> Result<Vec<f32>> {
    if samples.is_empty() || (ratio - 1.0).abs() < f64::EPSILON {
        return Ok(samples.to_vec());
    }

    let mut resampler =
        FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, RESAMPLE_CHUNK, 1)
            .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let expected = (samples.len() as f64 * ratio).round() as usize;
    let delay = resampler.output_delay();
    let mut out = Vec::with_capacity(expected + delay + RESAMPLE_CHUNK);

    let mut chunks = samples.chunks_exact(RESAMPLE_CHUNK);
    for chunk in &mut chunks {
        let block: [&[f32]; 1] = [chunk];
        let frames = resampler
            .process(&block[..], None)
            .map_err(|e| Error::Audio(format!("resampling failed: {e}")))?;
        out.extend_from_slice(&frames[0]);
    }

    let rest = chunks.remainder();
    if !rest.is_empty() {
        let block: [&[f32]; 1] = [rest];
        let frames = resampler
            .process_partial(Some(&block[..]), None)
            .map_err(|e| Error::Audio(format!("resampling failed: {e}")))?;
        out.extend_from_slice(&frames[0]);
    }

    // Flush the delay line
    let frames = resampler
        .process_partial(None::<&[&[f32]]>, None)
        .map_err(|e| Error::Audio(format!("resampling failed: {e}")))?;
    out.extend_from_slice(&frames[0]);

    out.drain(..delay.min(out.len()));
    out.truncate(expected);
    Ok(out)
}
