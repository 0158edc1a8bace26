/// Audio decoding
///
/// Decodes the self-describing audio container carried in client binary
/// frames (WAV, 44-byte header) to 16 kHz mono 16-bit little-endian PCM, or
/// passes through headerless PCM once `options.rawPcm=true` has been
/// negotiated (spec §6). Resampling/downmixing follow the teacher's
/// `audio_preprocessor.rs`.
use std::io::Cursor;

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::config::SAMPLE_RATE;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("malformed WAV container: {0}")]
    MalformedContainer(String),

    #[error("unsupported channel count: {0} (must be 1 or 2)")]
    UnsupportedChannels(u16),

    #[error("unsupported bit depth: {0} (must be 16)")]
    UnsupportedBitDepth(u16),

    #[error("odd-length PCM frame: {0} bytes (not 16-bit aligned)")]
    OddLengthFrame(usize),

    #[error("resampling failed: {0}")]
    ResamplingFailed(String),

    #[error("empty frame")]
    EmptyFrame,
}

/// Decode one incoming binary frame to 16 kHz mono 16-bit LE PCM bytes.
///
/// `raw_pcm` mirrors the session's negotiated `options.rawPcm` flag: when
/// true, `frame` is treated as headerless PCM already at the target format
/// and is only validated for 16-bit alignment.
pub fn decode_frame(frame: &[u8], raw_pcm: bool) -> Result<Vec<u8>, DecodeError> {
    if frame.is_empty() {
        return Err(DecodeError::EmptyFrame);
    }

    if raw_pcm {
        return validate_pcm16(frame);
    }

    decode_wav(frame)
}

/// Reject odd-byte frames; 16-bit PCM must be byte-pair aligned (spec §4.1).
fn validate_pcm16(frame: &[u8]) -> Result<Vec<u8>, DecodeError> {
    if frame.len() % 2 != 0 {
        return Err(DecodeError::OddLengthFrame(frame.len()));
    }
    Ok(frame.to_vec())
}

fn decode_wav(frame: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut reader = hound::WavReader::new(Cursor::new(frame))
        .map_err(|e| DecodeError::MalformedContainer(e.to_string()))?;
    let spec = reader.spec();

    if spec.channels == 0 || spec.channels > 2 {
        return Err(DecodeError::UnsupportedChannels(spec.channels));
    }
    if spec.bits_per_sample != 16 {
        return Err(DecodeError::UnsupportedBitDepth(spec.bits_per_sample));
    }

    let samples: Vec<i16> = reader
        .samples::<i16>()
        .collect::<Result<_, _>>()
        .map_err(|e| DecodeError::MalformedContainer(e.to_string()))?;

    trace!(
        "decoded WAV: {} samples, {}Hz, {} channel(s)",
        samples.len(),
        spec.sample_rate,
        spec.channels
    );

    let mono = if spec.channels == 2 {
        stereo_to_mono(&samples)
    } else {
        samples
    };

    let resampled = if spec.sample_rate != SAMPLE_RATE {
        resample(&mono, spec.sample_rate, SAMPLE_RATE)?
    } else {
        mono
    };

    debug!(
        "decode_frame: {} input bytes -> {} PCM samples",
        frame.len(),
        resampled.len()
    );

    Ok(i16_to_le_bytes(&resampled))
}

fn stereo_to_mono(stereo: &[i16]) -> Vec<i16> {
    if stereo.len() % 2 != 0 {
        warn!("stereo buffer has odd sample count, truncating last sample");
    }
    stereo
        .chunks_exact(2)
        .map(|pair| ((pair[0] as i32 + pair[1] as i32) / 2) as i16)
        .collect()
}

fn resample(samples: &[i16], input_rate: u32, output_rate: u32) -> Result<Vec<i16>, DecodeError> {
    use rubato::{
        Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType,
        WindowFunction,
    };

    if samples.is_empty() {
        return Ok(Vec::new());
    }

    let input_f32: Vec<f32> = samples.iter().map(|&s| s as f32 / 32_768.0).collect();

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = SincFixedIn::<f32>::new(
        output_rate as f64 / input_rate as f64,
        2.0,
        params,
        input_f32.len(),
        1,
    )
    .map_err(|e| DecodeError::ResamplingFailed(e.to_string()))?;

    let output_waves = resampler
        .process(&[input_f32], None)
        .map_err(|e| DecodeError::ResamplingFailed(e.to_string()))?;

    Ok(output_waves[0]
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * 32_767.0) as i16)
        .collect())
}

fn i16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// Build a minimal 44-byte-header WAV payload. Used by tests and example
/// clients; not needed on the decode path itself.
pub fn encode_wav(samples: &[i16], sample_rate: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).expect("valid wav spec");
        for &s in samples {
            writer.write_sample(s).expect("write sample");
        }
        writer.finalize().expect("finalize wav");
    }
    cursor.into_inner()
}
