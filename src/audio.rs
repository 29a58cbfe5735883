use std::f64::consts::PI;
use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

pub const TONE_SAMPLE_RATE: u32 = 16_000;
const TONE_FREQUENCIES: [f64; 3] = [440.0, 880.0, 1320.0];

pub fn wav_duration_seconds(path: &Path) -> Result<f64, hound::Error> {
    let reader = WavReader::open(path)?;
    let spec = reader.spec();
    let samples = reader.len();
    let frames = samples as f64 / spec.channels as f64;
    let duration = frames / spec.sample_rate as f64;
    Ok(duration)
}

/// Length of the placeholder voice: 50 ms per character, kept within 5..=15 s.
pub fn tone_duration_for(text: &str) -> f64 {
    (text.chars().count() as f64 * 0.05).clamp(5.0, 15.0)
}

/// Writes a mono 16-bit harmonic tone. Returns the duration actually written.
pub fn write_tone_wav(path: &Path, duration_seconds: f64) -> Result<f64, hound::Error> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: TONE_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let total = (TONE_SAMPLE_RATE as f64 * duration_seconds) as usize;

    let raw: Vec<f64> = (0..total)
        .map(|n| {
            let t = n as f64 / TONE_SAMPLE_RATE as f64;
            TONE_FREQUENCIES
                .iter()
                .enumerate()
                .map(|(i, f)| 0.5 / (i as f64 + 1.0) * (2.0 * PI * f * t).sin())
                .sum()
        })
        .collect();
    let peak = raw.iter().fold(0.0_f64, |m, s| m.max(s.abs()));
    let gain = if peak > 0.0 { 0.9 / peak } else { 0.0 };

    let mut writer = WavWriter::create(path, spec)?;
    for s in raw {
        writer.write_sample((s * gain * i16::MAX as f64) as i16)?;
    }
    writer.finalize()?;
    Ok(total as f64 / TONE_SAMPLE_RATE as f64)
}

/// Concatenates WAV parts that share one format into `out`.
pub fn concat_wavs(parts: &[impl AsRef<Path>], out: &Path) -> Result<(), hound::Error> {
    let Some(first) = parts.first() else {
        return Err(hound::Error::FormatError("no WAV parts to concatenate"));
    };
    let spec = WavReader::open(first.as_ref())?.spec();
    let mut writer = WavWriter::create(out, spec)?;

    for part in parts {
        let mut reader = WavReader::open(part.as_ref())?;
        if reader.spec() != spec {
            return Err(hound::Error::FormatError("WAV parts have different formats"));
        }
        match spec.sample_format {
            SampleFormat::Int => {
                for s in reader.samples::<i32>() {
                    writer.write_sample(s?)?;
                }
            }
            SampleFormat::Float => {
                for s in reader.samples::<f32>() {
                    writer.write_sample(s?)?;
                }
            }
        }
    }
    writer.finalize()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tone_duration_is_clamped() {
        assert_eq!(tone_duration_for("hi"), 5.0);
        assert_eq!(tone_duration_for(&"a".repeat(200)), 10.0);
        assert_eq!(tone_duration_for(&"a".repeat(10_000)), 15.0);
    }

    #[test]
    fn tone_file_reports_its_duration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let written = write_tone_wav(&path, 5.0).unwrap();
        assert!((written - 5.0).abs() < 1e-3);
        let measured = wav_duration_seconds(&path).unwrap();
        assert!((measured - 5.0).abs() < 1e-3);

        let reader = WavReader::open(&path).unwrap();
        let peak = reader
            .into_samples::<i16>()
            .map(|s| s.unwrap().unsigned_abs())
            .max()
            .unwrap();
        assert!(peak > 29_000 && peak <= 29_491);
    }

    #[test]
    fn concatenated_duration_is_the_sum() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.wav");
        let b = dir.path().join("b.wav");
        write_tone_wav(&a, 5.0).unwrap();
        write_tone_wav(&b, 6.0).unwrap();
        let out = dir.path().join("out.wav");
        concat_wavs(&[&a, &b], &out).unwrap();
        assert!((wav_duration_seconds(&out).unwrap() - 11.0).abs() < 1e-3);
    }

    #[test]
    fn concat_rejects_empty_input() {
        let dir = tempfile::tempdir().unwrap();
        let parts: Vec<std::path::PathBuf> = Vec::new();
        assert!(concat_wavs(&parts, &dir.path().join("x.wav")).is_err());
    }
}
