use clap::Parser;
use flux_imgvid::ImgvidConfig;
use std::path::PathBuf;

/// 命令行参数，覆盖配置文件与环境变量
#[derive(Parser, Debug)]
#[command(author, version, about = "FLUX image-to-video streaming server")]
pub struct Args {
    #[arg(long, default_value = "./config/imgvid.toml")]
    pub config: PathBuf,

    /// ffmpeg 可执行文件（名称或路径）
    #[arg(long)]
    pub ffmpeg: Option<PathBuf>,

    /// 帧缓存根目录
    #[arg(long)]
    pub cache: Option<PathBuf>,

    #[arg(long)]
    pub host: Option<String>,

    #[arg(long)]
    pub port: Option<u16>,

    /// 默认帧率
    #[arg(long)]
    pub rate: Option<u32>,

    /// 默认每源保留帧数
    #[arg(long)]
    pub max: Option<usize>,

    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    pub fn apply(&self, config: &mut ImgvidConfig) {
        if let Some(ffmpeg) = &self.ffmpeg {
            config.transcoder.ffmpeg_bin = ffmpeg.clone();
        }
        if let Some(cache) = &self.cache {
            config.cache.root_dir = cache.clone();
        }
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(rate) = self.rate {
            config.transcoder.default_rate = rate;
        }
        if let Some(max) = self.max {
            config.cache.default_max_frames = max;
        }
        if self.verbose {
            config.verbose = true;
        }
    }
}
