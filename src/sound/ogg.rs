//! Ogg Vorbis decoder implementation
//!
//! Uses the `lewton` crate for pure Rust Ogg Vorbis decoding. Loop points
//! come from the `LOOPSTART` / `LOOPEND` / `LOOPLENGTH` Vorbis comments.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use lewton::inside_ogg::OggStreamReader;

use super::decoder::{DecodeError, DecodeResult, LoopInfo, SoundDecoder};
use super::formats::AudioFormat;

/// Find the granule position of the last Ogg page.
///
/// For Vorbis the final granule position is the total number of frames.
fn last_granule<R: Read + Seek>(data: &mut R) -> Option<u64> {
    let file_size = data.seek(SeekFrom::End(0)).ok()?;

    // Search backwards for "OggS" page marker in the last 64KB
    let search_size = std::cmp::min(65536, file_size) as usize;
    let search_start = file_size - search_size as u64;
    data.seek(SeekFrom::Start(search_start)).ok()?;

    let mut buffer = vec![0u8; search_size];
    data.read_exact(&mut buffer).ok()?;

    let mut last: Option<u64> = None;
    for i in (0..buffer.len().saturating_sub(27)).rev() {
        if buffer[i..].starts_with(b"OggS") {
            // Granule position is at offset 6-13 (8 bytes, little-endian)
            let mut granule = [0u8; 8];
            granule.copy_from_slice(&buffer[i + 6..i + 14]);
            let granule = u64::from_le_bytes(granule);
            // -1 means "no packet finishes on this page"
            if granule != u64::MAX {
                last = Some(granule);
                break;
            }
        }
    }

    let _ = data.seek(SeekFrom::Start(0));
    last
}

/// Extract loop tags from Vorbis comments
fn parse_loop_tags(comments: &[(String, String)]) -> LoopInfo {
    let find = |key: &str| {
        comments
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .and_then(|(_, v)| v.trim().parse::<u64>().ok())
    };

    let start = find("LOOPSTART");
    let end = match (find("LOOPEND"), find("LOOPLENGTH")) {
        (Some(end), _) => Some(end),
        (None, Some(len)) => Some(start.unwrap_or(0) + len),
        (None, None) => None,
    };

    LoopInfo {
        enabled: start.is_some() || end.is_some(),
        start,
        end,
    }
}

fn open_reader(path: &Path) -> DecodeResult<OggStreamReader<BufReader<File>>> {
    let file = File::open(path)
        .map_err(|e| DecodeError::NotFound(format!("{}: {}", path.display(), e)))?;
    OggStreamReader::new(BufReader::new(file))
        .map_err(|e| DecodeError::InvalidData(format!("Failed to open Ogg stream: {:?}", e)))
}

/// Ogg Vorbis decoder using lewton
pub struct OggDecoder {
    /// Source file, kept for rewinding
    path: PathBuf,
    /// Sample frequency in Hz
    frequency: u32,
    /// Output format
    format: AudioFormat,
    /// Total length in frames
    total_frames: u64,
    /// Loop tags from the comment header
    loop_info: LoopInfo,
    /// The underlying Ogg stream reader
    reader: OggStreamReader<BufReader<File>>,
    /// Decoded sample buffer (interleaved i16 samples)
    sample_buffer: Vec<i16>,
    /// Current position in sample buffer
    buffer_pos: usize,
    /// Frame the next decode starts at
    current_frame: u64,
}

impl OggDecoder {
    /// Open an Ogg Vorbis file
    pub fn open(path: &Path) -> DecodeResult<Self> {
        let mut file = File::open(path)
            .map_err(|e| DecodeError::NotFound(format!("{}: {}", path.display(), e)))?;
        let total_frames = last_granule(&mut file).unwrap_or(0);
        drop(file);

        let reader = open_reader(path)?;
        let format = AudioFormat::from_channels(reader.ident_hdr.audio_channels as u16)
            .ok_or_else(|| {
                DecodeError::UnsupportedFormat(format!(
                    "{}: {} channels",
                    path.display(),
                    reader.ident_hdr.audio_channels
                ))
            })?;

        let loop_info = parse_loop_tags(&reader.comment_hdr.comment_list);

        Ok(Self {
            path: path.to_path_buf(),
            frequency: reader.ident_hdr.audio_sample_rate,
            format,
            total_frames,
            loop_info,
            reader,
            sample_buffer: Vec::new(),
            buffer_pos: 0,
            current_frame: 0,
        })
    }

    /// Decode the next packet and fill the sample buffer
    fn decode_next_packet(&mut self) -> DecodeResult<bool> {
        match self.reader.read_dec_packet_itl() {
            Ok(Some(samples)) => {
                self.sample_buffer = samples;
                self.buffer_pos = 0;
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(e) => Err(DecodeError::DecoderError(format!(
                "Ogg decode error: {:?}",
                e
            ))),
        }
    }

    /// Restart decoding from the first frame
    fn rewind(&mut self) -> DecodeResult<()> {
        self.reader = open_reader(&self.path)
            .map_err(|e| DecodeError::SeekFailed(format!("Failed to rewind: {}", e)))?;
        self.sample_buffer.clear();
        self.buffer_pos = 0;
        self.current_frame = 0;
        Ok(())
    }
}

impl SoundDecoder for OggDecoder {
    fn name(&self) -> &'static str {
        "Ogg Vorbis"
    }

    fn format(&self) -> AudioFormat {
        self.format
    }

    fn frequency(&self) -> u32 {
        self.frequency
    }

    fn length(&self) -> u64 {
        self.total_frames
    }

    fn position(&self) -> u64 {
        self.current_frame
    }

    fn seek(&mut self, frame: u64) -> DecodeResult<u64> {
        // lewton only seeks to page granularity, so rewind and decode forward
        // to land on the exact frame.
        let target = frame.min(self.total_frames);
        if target < self.current_frame {
            self.rewind()?;
        }

        let channels = self.format.channels() as u64;
        while self.current_frame < target {
            let available = (self.sample_buffer.len() - self.buffer_pos) as u64 / channels;
            if available == 0 {
                match self.decode_next_packet() {
                    Ok(true) => continue,
                    Ok(false) => break,
                    Err(e) => {
                        return Err(DecodeError::SeekFailed(format!(
                            "Seek failed during skip: {}",
                            e
                        )))
                    }
                }
            }
            let skip = available.min(target - self.current_frame);
            self.buffer_pos += (skip * channels) as usize;
            self.current_frame += skip;
        }

        Ok(self.current_frame)
    }

    fn decode(&mut self, buf: &mut [i16]) -> DecodeResult<usize> {
        let channels = self.format.channels() as usize;
        let wanted = buf.len() / channels * channels;
        let mut written = 0;

        while written < wanted {
            if self.buffer_pos >= self.sample_buffer.len() && !self.decode_next_packet()? {
                break;
            }

            let available = self.sample_buffer.len() - self.buffer_pos;
            let count = available.min(wanted - written);
            buf[written..written + count]
                .copy_from_slice(&self.sample_buffer[self.buffer_pos..self.buffer_pos + count]);
            self.buffer_pos += count;
            written += count;
        }

        let frames = written / channels;
        self.current_frame += frames as u64;
        Ok(frames)
    }

    fn loop_info(&self) -> LoopInfo {
        self.loop_info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn tag(k: &str, v: &str) -> (String, String) {
        (k.to_string(), v.to_string())
    }

    #[test]
    fn test_parse_loop_tags_start_and_length() {
        let info = parse_loop_tags(&[tag("LOOPSTART", "1000"), tag("LOOPLENGTH", "4000")]);
        assert!(info.enabled);
        assert_eq!(info.start, Some(1000));
        assert_eq!(info.end, Some(5000));
    }

    #[test]
    fn test_parse_loop_tags_end_wins_over_length() {
        let info = parse_loop_tags(&[
            tag("loopstart", "10"),
            tag("LoopEnd", "20"),
            tag("LOOPLENGTH", "999"),
        ]);
        assert_eq!(info.start, Some(10));
        assert_eq!(info.end, Some(20));
    }

    #[test]
    fn test_parse_loop_tags_absent() {
        let info = parse_loop_tags(&[tag("TITLE", "Starbase"), tag("LOOPSTART", "abc")]);
        assert_eq!(info, LoopInfo::default());
    }

    #[test]
    fn test_last_granule_finds_final_page() {
        let mut data = vec![0u8; 64];
        data.extend_from_slice(b"OggS");
        data.extend_from_slice(&[0, 0]);
        data.extend_from_slice(&1234u64.to_le_bytes());
        data.extend_from_slice(&[0u8; 40]);
        data.extend_from_slice(b"OggS");
        data.extend_from_slice(&[0, 4]);
        data.extend_from_slice(&88200u64.to_le_bytes());
        data.extend_from_slice(&[0u8; 40]);

        let mut cursor = Cursor::new(data);
        assert_eq!(last_granule(&mut cursor), Some(88200));
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn test_last_granule_skips_unfinished_pages() {
        let mut data = vec![0u8; 16];
        data.extend_from_slice(b"OggS");
        data.extend_from_slice(&[0, 0]);
        data.extend_from_slice(&500u64.to_le_bytes());
        data.extend_from_slice(&[0u8; 40]);
        data.extend_from_slice(b"OggS");
        data.extend_from_slice(&[0, 0]);
        data.extend_from_slice(&u64::MAX.to_le_bytes());
        data.extend_from_slice(&[0u8; 40]);

        assert_eq!(last_granule(&mut Cursor::new(data)), Some(500));
    }

    #[test]
    fn test_ogg_open_nonexistent() {
        let result = OggDecoder::open(Path::new("/nonexistent/file.ogg"));
        assert!(matches!(result, Err(DecodeError::NotFound(_))));
    }

    #[test]
    fn test_ogg_open_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"definitely not an ogg stream").unwrap();
        let result = OggDecoder::open(file.path());
        assert!(matches!(result, Err(DecodeError::InvalidData(_))));
    }

    #[test]
    fn test_ogg_decoder_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<OggDecoder>();
    }
}
