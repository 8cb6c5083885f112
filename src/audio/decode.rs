// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Whole-file audio decoding (WAV, MP3, FLAC, Ogg/Vorbis, ...) through symphonia.

use std::fs::File;
use std::path::Path;
use std::time::Duration;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Packet};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};
use tracing::debug;

/// Error types for decoding operations
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Audio file error: {0}")]
    Audio(#[from] SymphoniaError),

    #[error("No audio track found")]
    NoTrack,

    #[error("Sample rate not specified")]
    UnknownSampleRate,

    #[error("Channels not specified")]
    UnknownChannels,

    #[error("File contains no audio")]
    Empty,
}

/// Stream parameters read from a file header.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioInfo {
    pub sample_rate: u32,
    pub channels: u16,
    /// Known only when the container reports a frame count.
    pub duration: Option<Duration>,
}

/// A fully decoded file as interleaved f32 samples.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
}

/// An opened file positioned at its first audio track.
struct OpenedFile {
    format_reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    params: CodecParameters,
}

fn open(path: &Path) -> Result<OpenedFile, DecodeError> {
    // Include the path in IO errors so the user sees which file failed.
    let file = File::open(path).map_err(|e| {
        DecodeError::Io(std::io::Error::new(
            e.kind(),
            format!("{}: {}", path.display(), e),
        ))
    })?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(extension);
    }

    let probed = get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let format_reader = probed.format;

    let track = format_reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(DecodeError::NoTrack)?;
    let track_id = track.id;
    let params = track.codec_params.clone();
    let decoder = get_codecs().make(&params, &DecoderOptions::default())?;

    Ok(OpenedFile {
        format_reader,
        decoder,
        track_id,
        params,
    })
}

/// Reads the next packet of the given track. `Ok(None)` means end of stream.
fn next_packet(
    format_reader: &mut dyn FormatReader,
    decoder: &mut dyn Decoder,
    track_id: u32,
) -> Result<Option<Packet>, DecodeError> {
    loop {
        match format_reader.next_packet() {
            Ok(packet) if packet.track_id() == track_id => return Ok(Some(packet)),
            Ok(_) => continue,
            Err(SymphoniaError::ResetRequired) => decoder.reset(),
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(None)
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Decodes the next packet into interleaved samples. Corrupt packets are skipped.
fn decode_next(
    opened: &mut OpenedFile,
) -> Result<Option<(Vec<f32>, u16)>, DecodeError> {
    while let Some(packet) = next_packet(
        opened.format_reader.as_mut(),
        opened.decoder.as_mut(),
        opened.track_id,
    )? {
        let decoded = match opened.decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                debug!(error = e, "Skipping undecodable packet");
                continue;
            }
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(None)
            }
            Err(e) => return Err(e.into()),
        };

        let spec = *decoded.spec();
        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        if buffer.samples().is_empty() {
            // Header packets (e.g. Vorbis) decode to zero frames.
            continue;
        }
        return Ok(Some((
            buffer.samples().to_vec(),
            spec.channels.count() as u16,
        )));
    }
    Ok(None)
}

/// Reads the stream parameters of a file without decoding all of it. Used to validate assets.
pub fn probe(path: &Path) -> Result<AudioInfo, DecodeError> {
    let mut opened = open(path)?;
    let sample_rate = opened
        .params
        .sample_rate
        .ok_or(DecodeError::UnknownSampleRate)?;
    let duration = opened
        .params
        .n_frames
        .map(|frames| Duration::from_secs_f64(frames as f64 / sample_rate as f64));

    let channels = match opened.params.channels {
        Some(channels) => channels.count() as u16,
        // Some containers only reveal the layout once the first packet is decoded.
        None => match decode_next(&mut opened)? {
            Some((_, channels)) => channels,
            None => return Err(DecodeError::UnknownChannels),
        },
    };
    if channels == 0 {
        return Err(DecodeError::UnknownChannels);
    }

    Ok(AudioInfo {
        sample_rate,
        channels,
        duration,
    })
}

/// Decodes an entire file into memory.
pub fn decode_file(path: &Path) -> Result<DecodedAudio, DecodeError> {
    let mut opened = open(path)?;
    let mut sample_rate = opened.params.sample_rate;
    let mut channels = opened.params.channels.map(|c| c.count() as u16);
    let mut samples = Vec::new();

    while let Some((chunk, chunk_channels)) = decode_next(&mut opened)? {
        channels.get_or_insert(chunk_channels);
        samples.extend_from_slice(&chunk);
    }
    // Decoders report the real rate once running; fall back to it if the header had none.
    if sample_rate.is_none() {
        sample_rate = opened.decoder.codec_params().sample_rate;
    }

    let channels = channels.filter(|c| *c > 0).ok_or(DecodeError::UnknownChannels)?;
    let sample_rate = sample_rate.ok_or(DecodeError::UnknownSampleRate)?;
    if samples.is_empty() {
        return Err(DecodeError::Empty);
    }

    Ok(DecodedAudio {
        samples,
        channels,
        sample_rate,
    })
}
