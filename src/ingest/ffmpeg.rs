//! Frame source using FFmpeg.
//!
//! Decodes uploaded files (rewindable) and network streams or device paths
//! (live) into RGB24 frames in-memory.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use image::RgbImage;

use super::{FrameSource, SourceStats};
use crate::frame::image_from_rgb;

pub(crate) struct FfmpegSource {
    locator: String,
    rewindable: bool,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    frame_count: u64,
    eof_sent: bool,
}

impl FfmpegSource {
    pub(crate) fn open(locator: &str, rewindable: bool) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&locator)
            .with_context(|| format!("failed to open '{}' with ffmpeg", locator))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("'{}' has no video track", locator))?;
        let stream_index = input_stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        log::info!(
            "FfmpegSource: opened {} ({}x{}, {})",
            locator,
            decoder.width(),
            decoder.height(),
            if rewindable { "file" } else { "live" }
        );

        Ok(Self {
            locator: locator.to_string(),
            rewindable,
            input,
            stream_index,
            decoder,
            scaler,
            frame_count: 0,
            eof_sent: false,
        })
    }

    fn receive_decoded(&mut self) -> Result<Option<RgbImage>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        if self.decoder.receive_frame(&mut decoded).is_err() {
            return Ok(None);
        }
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&decoded, &mut rgb_frame)
            .context("scale frame to RGB")?;
        let image = frame_to_image(&rgb_frame)?;
        self.frame_count += 1;
        Ok(Some(image))
    }
}

impl FrameSource for FfmpegSource {
    fn read(&mut self) -> Result<Option<RgbImage>> {
        if let Some(image) = self.receive_decoded()? {
            return Ok(Some(image));
        }
        if self.eof_sent {
            return Ok(None);
        }

        loop {
            let next = self
                .input
                .packets()
                .next()
                .map(|(stream, packet)| (stream.index(), packet));
            let Some((index, packet)) = next else {
                break;
            };
            if index != self.stream_index {
                continue;
            }
            self.decoder
                .send_packet(&packet)
                .context("send packet to ffmpeg decoder")?;
            if let Some(image) = self.receive_decoded()? {
                return Ok(Some(image));
            }
        }

        // Drain frames still buffered in the decoder.
        self.decoder.send_eof().context("flush ffmpeg decoder")?;
        self.eof_sent = true;
        self.receive_decoded()
    }

    fn is_rewindable(&self) -> bool {
        self.rewindable
    }

    fn rewind(&mut self) -> Result<()> {
        if !self.rewindable {
            return Err(anyhow!("{} is a live source", self.locator));
        }
        self.input
            .seek(0, ..)
            .with_context(|| format!("seek {} to start", self.locator))?;
        self.decoder.flush();
        self.eof_sent = false;
        Ok(())
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            locator: self.locator.clone(),
        }
    }
}

fn frame_to_image(frame: &ffmpeg::frame::Video) -> Result<RgbImage> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let packed = data
            .get(..row_bytes * height as usize)
            .context("ffmpeg frame is shorter than its dimensions")?;
        return image_from_rgb(packed.to_vec(), width, height);
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    image_from_rgb(pixels, width, height)
}
