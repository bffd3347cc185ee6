//! FFmpeg subprocess source.
//!
//! Decodes files, network streams, and V4L2 devices by piping raw BGR24 frames
//! out of an `ffmpeg` child process. Works without any native video library
//! linked into the binary.

use std::{
    io::{ErrorKind, Read},
    process::{Child, ChildStdout, Command, Stdio},
};

use anyhow::anyhow;
use tracing::debug;

use crate::{
    reader::FrameProducer,
    source::parse_device_index,
    types::{CaptureError, Frame, FrameFormat},
};

pub struct FfmpegProducer {
    uri: String,
    target_size: (u32, u32),
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    buffer: Vec<u8>,
}

impl FfmpegProducer {
    pub fn new(uri: &str, target_size: (u32, u32)) -> Self {
        Self {
            uri: uri.to_string(),
            target_size,
            child: None,
            stdout: None,
            buffer: vec![0u8; Frame::byte_len(target_size.0, target_size.1, FrameFormat::Bgr8)],
        }
    }

    fn command(&self) -> Command {
        let scale_arg = format!("scale={}:{}", self.target_size.0, self.target_size.1);
        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-hide_banner").arg("-loglevel").arg("error");

        if let Some(index) = parse_device_index(&self.uri) {
            cmd.arg("-f")
                .arg("video4linux2")
                .arg("-i")
                .arg(format!("/dev/video{index}"));
        } else if self.uri.starts_with("rtsp://") || self.uri.starts_with("rtsps://") {
            cmd.arg("-rtsp_transport")
                .arg("tcp")
                .arg("-fflags")
                .arg("nobuffer")
                .arg("-flags")
                .arg("low_delay")
                .arg("-i")
                .arg(&self.uri);
        } else {
            cmd.arg("-re").arg("-i").arg(&self.uri);
        }

        cmd.arg("-an")
            .arg("-vf")
            .arg(&scale_arg)
            .arg("-pix_fmt")
            .arg("bgr24")
            .arg("-f")
            .arg("rawvideo")
            .arg("-");
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        cmd
    }
}

impl FrameProducer for FfmpegProducer {
    fn name(&self) -> &str {
        &self.uri
    }

    fn open(&mut self) -> Result<(), CaptureError> {
        let mut child = self.command().spawn().map_err(|err| {
            debug!("failed to spawn ffmpeg for {}: {err}", self.uri);
            CaptureError::Open {
                uri: self.uri.clone(),
            }
        })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CaptureError::Other(anyhow!("failed to capture ffmpeg stdout")))?;
        self.stdout = Some(stdout);
        self.child = Some(child);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        let stdout = self.stdout.as_mut().ok_or(CaptureError::NotStarted)?;
        match stdout.read_exact(&mut self.buffer) {
            Ok(()) => {
                let (width, height) = self.target_size;
                Frame::new(self.buffer.clone(), width, height, FrameFormat::Bgr8).map(Some)
            }
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => Ok(None),
            Err(err) => Err(CaptureError::Other(err.into())),
        }
    }

    fn close(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
