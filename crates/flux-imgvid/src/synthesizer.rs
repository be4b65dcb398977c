use crate::config::TranscoderConfig;
use crate::error::{ImgvidError, Result};
use crate::selector::FramePattern;
use bytes::{Bytes, BytesMut};
use std::io;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{ChildStderr, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const RELAY_CHUNK_SIZE: usize = 64 * 1024;

/// 视频输出端（HTTP 响应体、内存缓冲等）
#[async_trait::async_trait]
pub trait VideoSink: Send {
    /// 在任何字节之前调用一次
    async fn set_content_type(&mut self, content_type: &str) -> io::Result<()>;

    async fn write(&mut self, chunk: Bytes) -> io::Result<()>;
}

#[async_trait::async_trait]
impl<'a, T: VideoSink + ?Sized> VideoSink for &'a mut T {
    async fn set_content_type(&mut self, content_type: &str) -> io::Result<()> {
        (**self).set_content_type(content_type).await
    }

    async fn write(&mut self, chunk: Bytes) -> io::Result<()> {
        (**self).write(chunk).await
    }
}

/// 内存缓冲输出端
#[derive(Debug, Default)]
pub struct BufferSink {
    pub content_type: Option<String>,
    pub data: BytesMut,
    pub chunks: usize,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl VideoSink for BufferSink {
    async fn set_content_type(&mut self, content_type: &str) -> io::Result<()> {
        self.content_type = Some(content_type.to_string());
        Ok(())
    }

    async fn write(&mut self, chunk: Bytes) -> io::Result<()> {
        if self.content_type.is_none() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "content type must be set before writing",
            ));
        }
        self.data.extend_from_slice(&chunk);
        self.chunks += 1;
        Ok(())
    }
}

/// 输出端事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    ContentType(String),
    Chunk(Bytes),
}

/// 基于 mpsc 的输出端，接收端被丢弃（客户端断开）后写入失败
pub struct ChannelSink {
    tx: mpsc::Sender<SinkEvent>,
}

impl ChannelSink {
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<SinkEvent>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }

    async fn send(&self, event: SinkEvent) -> io::Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "sink receiver dropped"))
    }
}

#[async_trait::async_trait]
impl VideoSink for ChannelSink {
    async fn set_content_type(&mut self, content_type: &str) -> io::Result<()> {
        self.send(SinkEvent::ContentType(content_type.to_string()))
            .await
    }

    async fn write(&mut self, chunk: Bytes) -> io::Result<()> {
        self.send(SinkEvent::Chunk(chunk)).await
    }
}

/// 合成结果
#[derive(Debug, Clone)]
pub struct SynthesisReport {
    pub bytes_relayed: u64,
    pub chunks: usize,
    pub elapsed: Duration,
}

enum RelayError {
    Read(io::Error),
    Sink(io::Error),
}

/// 流合成器：以子进程方式驱动 ffmpeg，把标准输出实时转发到输出端
pub struct StreamSynthesizer {
    config: TranscoderConfig,
    verbose: bool,
}

impl StreamSynthesizer {
    pub fn new(config: TranscoderConfig, verbose: bool) -> Self {
        Self { config, verbose }
    }

    /// 构造转码命令
    ///
    /// `{ffmpeg} {input_args} -r {rate} -codec {codec} -i {glob} -f {format} pipe:1`
    pub fn command(&self, pattern: &FramePattern, rate: u32, codec: &str) -> Command {
        let mut cmd = Command::new(&self.config.ffmpeg_bin);
        cmd.args(&self.config.input_args);
        cmd.arg("-r").arg(rate.to_string());
        cmd.arg("-codec").arg(codec);
        cmd.arg("-i").arg(pattern.as_glob());
        cmd.arg("-f").arg(&self.config.output_format);
        cmd.arg("pipe:1");

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        // 诊断输出只在 verbose 时采集
        cmd.stderr(if self.verbose {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.kill_on_drop(true);
        cmd
    }

    /// 运行转码器并把输出转发到 `sink`
    ///
    /// 进程非零退出时已转发的字节不会撤回，调用方需容忍被截断的输出。
    pub async fn synthesize<S: VideoSink + ?Sized>(
        &self,
        pattern: &FramePattern,
        rate: u32,
        codec: &str,
        sink: &mut S,
    ) -> Result<SynthesisReport> {
        let start = Instant::now();
        let mut cmd = self.command(pattern, rate, codec);

        if self.verbose {
            info!(target: "transcoder", command = ?cmd.as_std(), "Invoking transcoder");
        } else {
            debug!(target: "transcoder", pattern = %pattern.as_glob(), rate, codec, "Invoking transcoder");
        }

        let mut child = cmd.spawn().map_err(|e| ImgvidError::TranscoderLaunch {
            binary: self.config.ffmpeg_bin.display().to_string(),
            source: e,
        })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            ImgvidError::TranscoderExecution("transcoder stdout not captured".to_string())
        })?;
        let diagnostics = child.stderr.take().map(|stderr| tokio::spawn(drain_diagnostics(stderr)));

        if let Err(e) = sink.set_content_type(&self.config.content_type).await {
            let _ = child.start_kill();
            let _ = child.wait().await;
            return Err(ImgvidError::RelayAborted(e));
        }

        let relayed = relay(stdout, sink).await;

        let (bytes_relayed, chunks) = match relayed {
            Ok(counts) => counts,
            Err(err) => {
                // 转发失败（客户端断开）时终止子进程
                let _ = child.start_kill();
                let _ = child.wait().await;
                if let Some(task) = diagnostics {
                    let _ = task.await;
                }
                return Err(match err {
                    RelayError::Sink(e) => {
                        debug!(target: "transcoder", error = %e, "Sink closed, transcoder killed");
                        ImgvidError::RelayAborted(e)
                    }
                    RelayError::Read(e) => ImgvidError::TranscoderExecution(format!(
                        "failed to read transcoder output: {}",
                        e
                    )),
                });
            }
        };

        let status = child.wait().await?;
        if let Some(task) = diagnostics {
            let _ = task.await;
        }

        if !status.success() {
            warn!(
                target: "transcoder",
                status = %status,
                bytes_relayed,
                "Transcoder exited with failure"
            );
            return Err(ImgvidError::TranscoderExecution(status.to_string()));
        }

        let report = SynthesisReport {
            bytes_relayed,
            chunks,
            elapsed: start.elapsed(),
        };
        debug!(
            target: "transcoder",
            bytes = report.bytes_relayed,
            chunks = report.chunks,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Synthesis completed"
        );
        Ok(report)
    }
}

/// 边读边转发，返回（字节数，块数）
async fn relay<R, S>(mut reader: R, sink: &mut S) -> std::result::Result<(u64, usize), RelayError>
where
    R: AsyncRead + Unpin,
    S: VideoSink + ?Sized,
{
    let mut buf = BytesMut::with_capacity(RELAY_CHUNK_SIZE);
    let mut total = 0u64;
    let mut chunks = 0usize;

    loop {
        buf.reserve(RELAY_CHUNK_SIZE);
        let n = reader.read_buf(&mut buf).await.map_err(RelayError::Read)?;
        if n == 0 {
            break;
        }
        sink.write(buf.split().freeze())
            .await
            .map_err(RelayError::Sink)?;
        total += n as u64;
        chunks += 1;
    }

    Ok((total, chunks))
}

async fn drain_diagnostics(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        info!(target: "transcoder", "{}", line);
    }
}
