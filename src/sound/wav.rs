//! WAV decoder implementation
//!
//! Decodes WAV (RIFF WAVE) audio files. Supports:
//! - 8-bit and 16-bit PCM
//! - Mono and stereo
//! - Any sample rate
//! - Loop points from the `smpl` chunk (first loop only)
//!
//! The whole file is converted to 16-bit PCM at open time.

use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use super::decoder::{DecodeError, DecodeResult, LoopInfo, SoundDecoder};
use super::formats::AudioFormat;

// WAV format constants (little-endian IDs)
const RIFF_ID: u32 = 0x46464952; // "RIFF"
const WAVE_ID: u32 = 0x45564157; // "WAVE"
const FMT_ID: u32 = 0x20746d66; // "fmt "
const DATA_ID: u32 = 0x61746164; // "data"
const SMPL_ID: u32 = 0x6c706d73; // "smpl"

// WAV format codes
const WAVE_FORMAT_PCM: u16 = 1;

/// Size of the fixed part of a `smpl` chunk, before the loop records
const SMPL_HEADER_SIZE: u32 = 36;

/// WAV format chunk
#[derive(Debug, Default)]
struct WavFormatHeader {
    channels: u16,        // 1 = mono, 2 = stereo
    sample_rate: u32,     // Samples per second
    bits_per_sample: u16, // 8 or 16
}

/// WAV chunk header
#[derive(Debug, Default)]
struct WavChunkHeader {
    id: u32,
    size: u32,
}

/// WAV decoder
pub struct WavDecoder {
    /// Sample frequency in Hz
    frequency: u32,
    /// Output format
    format: AudioFormat,
    /// Decoded samples (interleaved)
    samples: Vec<i16>,
    /// Frame the next decode starts at
    position: u64,
    /// Loop tags from the `smpl` chunk
    loop_info: LoopInfo,
}

impl WavDecoder {
    /// Open a WAV file from disk
    pub fn open(path: &Path) -> DecodeResult<Self> {
        let data = std::fs::read(path)
            .map_err(|e| DecodeError::NotFound(format!("{}: {}", path.display(), e)))?;
        Self::from_bytes(&data)
    }

    /// Parse a complete WAV file held in memory
    pub fn from_bytes(data: &[u8]) -> DecodeResult<Self> {
        let mut cursor = Cursor::new(data);
        Self::parse_file_header(&mut cursor)?;

        let mut fmt_header: Option<WavFormatHeader> = None;
        let mut pcm: Option<&[u8]> = None;
        let mut loop_info = LoopInfo::default();

        while (cursor.position() as usize) + 8 <= data.len() {
            let chunk = Self::parse_chunk_header(&mut cursor)?;
            let start = cursor.position() as usize;

            match chunk.id {
                FMT_ID => {
                    fmt_header = Some(Self::parse_format_header(&mut cursor, chunk.size)?);
                }
                DATA_ID => {
                    let end = (start + chunk.size as usize).min(data.len());
                    pcm = Some(&data[start..end]);
                }
                SMPL_ID => {
                    loop_info = Self::parse_sampler_chunk(&mut cursor, chunk.size)?;
                }
                _ => {}
            }

            // Chunks are word aligned
            let next = start as u64 + chunk.size as u64 + (chunk.size & 1) as u64;
            cursor
                .seek(SeekFrom::Start(next))
                .map_err(|e| DecodeError::InvalidData(format!("Failed to skip chunk: {}", e)))?;
        }

        let fmt = fmt_header
            .ok_or_else(|| DecodeError::InvalidData("No format chunk found".to_string()))?;
        let pcm = match pcm {
            Some(p) if !p.is_empty() => p,
            _ => return Err(DecodeError::InvalidData("No data chunk found".to_string())),
        };

        let format = AudioFormat::from_channels(fmt.channels).ok_or_else(|| {
            DecodeError::InvalidData(format!("Unsupported channel count: {}", fmt.channels))
        })?;

        let mut samples = if fmt.bits_per_sample == 8 {
            // 8-bit WAV is unsigned
            pcm.iter().map(|&b| ((b as i16) - 128) << 8).collect::<Vec<_>>()
        } else {
            pcm.chunks_exact(2)
                .map(|c| i16::from_le_bytes([c[0], c[1]]))
                .collect::<Vec<_>>()
        };
        // Drop a trailing partial frame
        let whole = samples.len() / format.channels() as usize * format.channels() as usize;
        samples.truncate(whole);

        Ok(Self {
            frequency: fmt.sample_rate,
            format,
            samples,
            position: 0,
            loop_info,
        })
    }

    /// Read a little-endian u16
    fn read_le_u16(cursor: &mut Cursor<&[u8]>) -> DecodeResult<u16> {
        let mut buf = [0u8; 2];
        cursor
            .read_exact(&mut buf)
            .map_err(|e| DecodeError::InvalidData(format!("Failed to read u16: {}", e)))?;
        Ok(u16::from_le_bytes(buf))
    }

    /// Read a little-endian u32
    fn read_le_u32(cursor: &mut Cursor<&[u8]>) -> DecodeResult<u32> {
        let mut buf = [0u8; 4];
        cursor
            .read_exact(&mut buf)
            .map_err(|e| DecodeError::InvalidData(format!("Failed to read u32: {}", e)))?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Parse WAV file header
    fn parse_file_header(cursor: &mut Cursor<&[u8]>) -> DecodeResult<()> {
        let id = Self::read_le_u32(cursor)?;
        let _size = Self::read_le_u32(cursor)?;
        let format = Self::read_le_u32(cursor)?;

        if id != RIFF_ID {
            return Err(DecodeError::InvalidData("Not a RIFF file".to_string()));
        }
        if format != WAVE_ID {
            return Err(DecodeError::InvalidData("Not a WAVE file".to_string()));
        }
        Ok(())
    }

    /// Parse chunk header
    fn parse_chunk_header(cursor: &mut Cursor<&[u8]>) -> DecodeResult<WavChunkHeader> {
        let id = Self::read_le_u32(cursor)?;
        let size = Self::read_le_u32(cursor)?;
        Ok(WavChunkHeader { id, size })
    }

    /// Parse format chunk
    fn parse_format_header(
        cursor: &mut Cursor<&[u8]>,
        size: u32,
    ) -> DecodeResult<WavFormatHeader> {
        if size < 16 {
            return Err(DecodeError::InvalidData(
                "Format chunk too small".to_string(),
            ));
        }

        let format = Self::read_le_u16(cursor)?;
        let channels = Self::read_le_u16(cursor)?;
        let sample_rate = Self::read_le_u32(cursor)?;
        let _byte_rate = Self::read_le_u32(cursor)?;
        let _block_align = Self::read_le_u16(cursor)?;
        let bits_per_sample = Self::read_le_u16(cursor)?;

        if format != WAVE_FORMAT_PCM {
            return Err(DecodeError::InvalidData(format!(
                "Unsupported WAV format: {} (only PCM supported)",
                format
            )));
        }

        if channels != 1 && channels != 2 {
            return Err(DecodeError::InvalidData(format!(
                "Unsupported channel count: {}",
                channels
            )));
        }

        if bits_per_sample != 8 && bits_per_sample != 16 {
            return Err(DecodeError::InvalidData(format!(
                "Unsupported bits per sample: {}",
                bits_per_sample
            )));
        }

        Ok(WavFormatHeader {
            channels,
            sample_rate,
            bits_per_sample,
        })
    }

    /// Parse the sampler chunk; the first loop record becomes the loop region
    fn parse_sampler_chunk(cursor: &mut Cursor<&[u8]>, size: u32) -> DecodeResult<LoopInfo> {
        if size < SMPL_HEADER_SIZE + 24 {
            return Ok(LoopInfo::default());
        }

        // manufacturer, product, period, unity note, pitch fraction,
        // SMPTE format, SMPTE offset
        for _ in 0..7 {
            Self::read_le_u32(cursor)?;
        }
        let loop_count = Self::read_le_u32(cursor)?;
        let _sampler_data = Self::read_le_u32(cursor)?;
        if loop_count == 0 {
            return Ok(LoopInfo::default());
        }

        let _cue_id = Self::read_le_u32(cursor)?;
        let _loop_type = Self::read_le_u32(cursor)?;
        let start = Self::read_le_u32(cursor)? as u64;
        // The end frame is inclusive
        let end = Self::read_le_u32(cursor)? as u64 + 1;

        Ok(LoopInfo {
            enabled: true,
            start: Some(start),
            end: Some(end),
        })
    }
}

impl SoundDecoder for WavDecoder {
    fn name(&self) -> &'static str {
        "Wave"
    }

    fn format(&self) -> AudioFormat {
        self.format
    }

    fn frequency(&self) -> u32 {
        self.frequency
    }

    fn length(&self) -> u64 {
        (self.samples.len() / self.format.channels() as usize) as u64
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn seek(&mut self, frame: u64) -> DecodeResult<u64> {
        self.position = frame.min(self.length());
        Ok(self.position)
    }

    fn decode(&mut self, buf: &mut [i16]) -> DecodeResult<usize> {
        let channels = self.format.channels() as usize;
        let remaining = (self.length() - self.position) as usize;
        let frames = (buf.len() / channels).min(remaining);

        let from = self.position as usize * channels;
        let count = frames * channels;
        buf[..count].copy_from_slice(&self.samples[from..from + count]);
        self.position += frames as u64;

        Ok(frames)
    }

    fn loop_info(&self) -> LoopInfo {
        self.loop_info
    }
}
