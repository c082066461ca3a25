//! PCM sinks: the trait the generator's host loop writes into, and the
//! sound-file implementations (WAV, AU, raw).

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::{info, warn};

/// Anything that accepts interleaved 16-bit frames.
pub trait Sink {
    fn write_s16(&mut self, interleaved: &[i16], frames: u32) -> Result<(), String>;

    /// Flush and close; file sinks patch their header size fields here.
    fn finish(&mut self) -> Result<(), String> {
        Ok(())
    }
}

/// WAV writer. Header size fields are finalized on close.
pub struct WavSink {
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    path: String,
}

impl WavSink {
    pub fn create(path: &Path, srate: u32, channels: u16) -> Result<WavSink, String> {
        let spec = hound::WavSpec {
            channels,
            sample_rate: srate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(path, spec)
            .map_err(|e| format!("failed to create WAV file {}: {e}", path.display()))?;
        Ok(WavSink {
            writer: Some(writer),
            path: path.display().to_string(),
        })
    }
}

impl Sink for WavSink {
    fn write_s16(&mut self, interleaved: &[i16], _frames: u32) -> Result<(), String> {
        let writer = self
            .writer
            .as_mut()
            .ok_or("write to a finished WAV sink")?;
        for &s in interleaved {
            writer
                .write_sample(s)
                .map_err(|e| format!("failed to write sample: {e}"))?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), String> {
        if let Some(writer) = self.writer.take() {
            writer
                .finalize()
                .map_err(|e| format!("failed to finalize WAV: {e}"))?;
            info!("wrote {}", self.path);
        }
        Ok(())
    }
}

/// Raw interleaved little-endian s16, no header.
pub struct RawSink {
    w: BufWriter<File>,
    path: String,
}

impl RawSink {
    pub fn create(path: &Path) -> Result<RawSink, String> {
        let f = File::create(path)
            .map_err(|e| format!("failed to create {}: {e}", path.display()))?;
        Ok(RawSink {
            w: BufWriter::new(f),
            path: path.display().to_string(),
        })
    }
}

impl Sink for RawSink {
    fn write_s16(&mut self, interleaved: &[i16], _frames: u32) -> Result<(), String> {
        for &s in interleaved {
            self.w
                .write_all(&s.to_le_bytes())
                .map_err(|e| format!("failed to write sample: {e}"))?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), String> {
        self.w
            .flush()
            .map_err(|e| format!("failed to flush {}: {e}", self.path))?;
        info!("wrote {}", self.path);
        Ok(())
    }
}

const AU_MAGIC: u32 = 0x2e736e64; // ".snd"
const AU_HEADER_LEN: u32 = 24;
const AU_ENCODING_S16: u32 = 3;
const AU_SIZE_UNKNOWN: u32 = 0xffff_ffff;

/// AU (".snd") writer: big-endian header and samples, encoding 3
/// (16-bit linear PCM). The data-size field starts as unknown and is
/// patched on close when the file is seekable.
pub struct AuSink {
    w: BufWriter<File>,
    path: String,
    data_bytes: u64,
}

impl AuSink {
    pub fn create(path: &Path, srate: u32, channels: u16) -> Result<AuSink, String> {
        let f = File::create(path)
            .map_err(|e| format!("failed to create {}: {e}", path.display()))?;
        let mut w = BufWriter::new(f);
        for word in [
            AU_MAGIC,
            AU_HEADER_LEN,
            AU_SIZE_UNKNOWN,
            AU_ENCODING_S16,
            srate,
            channels as u32,
        ] {
            w.write_all(&word.to_be_bytes())
                .map_err(|e| format!("failed to write AU header: {e}"))?;
        }
        Ok(AuSink {
            w,
            path: path.display().to_string(),
            data_bytes: 0,
        })
    }
}

impl Sink for AuSink {
    fn write_s16(&mut self, interleaved: &[i16], _frames: u32) -> Result<(), String> {
        for &s in interleaved {
            self.w
                .write_all(&s.to_be_bytes())
                .map_err(|e| format!("failed to write sample: {e}"))?;
        }
        self.data_bytes += interleaved.len() as u64 * 2;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), String> {
        self.w
            .flush()
            .map_err(|e| format!("failed to flush {}: {e}", self.path))?;
        let f = self.w.get_mut();
        // Leave the size field unknown on an unseekable target.
        if f.seek(SeekFrom::Start(8)).is_ok() {
            let size = self.data_bytes.min(AU_SIZE_UNKNOWN as u64 - 1) as u32;
            if let Err(e) = f.write_all(&size.to_be_bytes()) {
                warn!("could not patch AU size field: {e}");
            }
        }
        info!("wrote {}", self.path);
        Ok(())
    }
}

/// Pick a file sink by extension: `.wav`, `.au`, otherwise raw.
pub fn sink_for_path(path: &Path, srate: u32, channels: u16) -> Result<Box<dyn Sink>, String> {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("wav") => Ok(Box::new(WavSink::create(path, srate, channels)?)),
        Some("au") | Some("snd") => Ok(Box::new(AuSink::create(path, srate, channels)?)),
        _ => Ok(Box::new(RawSink::create(path)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_round_trips_samples() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.wav");
        let samples: Vec<i16> = (0..200).map(|i| (i * 131) as i16).collect();
        {
            let mut sink = WavSink::create(&path, 44100, 2).expect("create");
            sink.write_s16(&samples, 100).expect("write");
            sink.finish().expect("finish");
        }
        let mut reader = hound::WavReader::open(&path).expect("open");
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 44100);
        let read: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(read, samples);
    }

    #[test]
    fn au_header_and_size_patch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.au");
        {
            let mut sink = AuSink::create(&path, 48000, 1).expect("create");
            sink.write_s16(&[1, -2, 3, -4], 4).expect("write");
            sink.finish().expect("finish");
        }
        let bytes = std::fs::read(&path).expect("read");
        assert_eq!(&bytes[0..4], b".snd");
        assert_eq!(u32::from_be_bytes(bytes[4..8].try_into().unwrap()), 24);
        assert_eq!(u32::from_be_bytes(bytes[8..12].try_into().unwrap()), 8);
        assert_eq!(u32::from_be_bytes(bytes[12..16].try_into().unwrap()), 3);
        assert_eq!(u32::from_be_bytes(bytes[16..20].try_into().unwrap()), 48000);
        assert_eq!(u32::from_be_bytes(bytes[20..24].try_into().unwrap()), 1);
        assert_eq!(i16::from_be_bytes(bytes[24..26].try_into().unwrap()), 1);
        assert_eq!(i16::from_be_bytes(bytes[26..28].try_into().unwrap()), -2);
    }

    #[test]
    fn raw_is_little_endian_payload_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.raw");
        {
            let mut sink = RawSink::create(&path).expect("create");
            sink.write_s16(&[0x0102, 0x0304], 1).expect("write");
            sink.finish().expect("finish");
        }
        let bytes = std::fs::read(&path).expect("read");
        assert_eq!(bytes, vec![0x02, 0x01, 0x04, 0x03]);
    }
}
