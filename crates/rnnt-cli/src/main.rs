//!
//! CLI для стримингового RNN-Transducer: обучение и распознавание.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::Instant;

use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use tracing::{info, warn};

use audio::{load_wav, to_mono, FeatureExtractor, Resampler};
use model_transducer::StreamingTransducer;
use rnnt_core::{CharFeaturizer, Config, TranscriptionResult};
use rnnt_train::{CheckpointManager, TrainOptions, TransducerTrainer};

#[derive(Parser)]
#[command(name = "rnnt")]
#[command(author, version, about = "RustRNNT: Streaming RNN-Transducer Speech Recognition", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Обучить модель по конфигурации
    Train {
        /// The file path of model configuration file
        #[arg(long, default_value = "config.json")]
        config: PathBuf,

        /// Max number of checkpoints to keep
        #[arg(long, default_value_t = 10)]
        max_ckpts: usize,

        /// Train batch size (перекрывает конфиг)
        #[arg(long)]
        tbs: Option<usize>,

        /// Evaluation batch size (перекрывает конфиг)
        #[arg(long)]
        ebs: Option<usize>,

        /// Devices' ids для обучения (используется только первый)
        #[arg(long, num_args = 0..)]
        devices: Vec<usize>,

        /// Enable mixed precision (BF16 на CUDA)
        #[arg(long, default_value_t = false)]
        mxp: bool,

        /// Enable caching for dataset
        #[arg(long, default_value_t = false)]
        cache: bool,
    },

    /// Transcribe an audio file to text
    Transcribe {
        /// The file path of model configuration file
        #[arg(long, default_value = "config.json")]
        config: PathBuf,

        /// Директория чекпоинтов (по умолчанию из конфига)
        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,

        /// Path to the audio file (WAV format)
        #[arg(long)]
        audio: PathBuf,

        /// Device to use (cpu, metal, cuda)
        #[arg(long, default_value = "cpu")]
        device: String,

        /// Ширина beam search (без флага — жадное декодирование)
        #[arg(long)]
        beam_width: Option<usize>,

        /// Сохранить итоговый текст распознавания в файл (UTF-8)
        #[arg(long)]
        out_text: Option<PathBuf>,
    },

    /// Стриминговое распознавание WAV по чанкам (эмуляция реального времени)
    Stream {
        /// The file path of model configuration file
        #[arg(long, default_value = "config.json")]
        config: PathBuf,

        /// Директория чекпоинтов (по умолчанию из конфига)
        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,

        /// Path to the audio file (WAV format)
        #[arg(long)]
        audio: PathBuf,

        /// Device to use (cpu, metal, cuda)
        #[arg(long, default_value = "cpu")]
        device: String,

        /// Длина чанка в миллисекундах
        #[arg(long, default_value_t = 500)]
        chunk_ms: usize,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train {
            config,
            max_ckpts,
            tbs,
            ebs,
            devices,
            mxp,
            cache,
        } => run_train(config, max_ckpts, tbs, ebs, devices, mxp, cache),
        Commands::Transcribe {
            config,
            checkpoint_dir,
            audio,
            device,
            beam_width,
            out_text,
        } => run_transcribe(config, checkpoint_dir, audio, &device, beam_width, out_text),
        Commands::Stream {
            config,
            checkpoint_dir,
            audio,
            device,
            chunk_ms,
        } => run_stream(config, checkpoint_dir, audio, &device, chunk_ms),
    }
}

// ---------------------------------------------------------------------------
// Train
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
fn run_train(
    config_path: PathBuf,
    max_ckpts: usize,
    tbs: Option<usize>,
    ebs: Option<usize>,
    devices: Vec<usize>,
    mxp: bool,
    cache: bool,
) -> Result<()> {
    let config = Config::from_file(&config_path)?;

    let device = train_device(&devices);
    let dtype = if mxp {
        if device.is_cuda() {
            DType::BF16
        } else {
            warn!("--mxp поддерживается только на CUDA, остаёмся в F32");
            DType::F32
        }
    } else {
        DType::F32
    };

    println!("🎓 RustRNNT - Training");
    println!("Config: {}", config_path.display());
    println!("Device: {:?}, dtype: {:?}", device, dtype);

    let trainer = TransducerTrainer::new(config, device, dtype);
    trainer.train(&TrainOptions {
        max_ckpts,
        train_batch_size: tbs,
        eval_batch_size: ebs,
        cache,
    })?;
    Ok(())
}

/// Выбрать устройство обучения из списка id (candle не умеет
/// распределённое обучение — берём первый id).
fn train_device(devices: &[usize]) -> Device {
    let id = devices.first().copied().unwrap_or(0);
    if devices.len() > 1 {
        warn!(
            "Задано {} устройств, распределённое обучение не поддерживается — используется cuda:{id}",
            devices.len()
        );
    }
    match Device::new_cuda(id) {
        Ok(device) => device,
        Err(_) => {
            info!("CUDA недоступна, обучение на CPU");
            Device::Cpu
        }
    }
}

// ---------------------------------------------------------------------------
// Transcribe
// ---------------------------------------------------------------------------

fn run_transcribe(
    config_path: PathBuf,
    checkpoint_dir: Option<PathBuf>,
    audio_path: PathBuf,
    device: &str,
    beam_width: Option<usize>,
    out_text: Option<PathBuf>,
) -> Result<()> {
    let config = Config::from_file(&config_path)?;
    let device = create_device(device)?;
    let (model, text, extractor) = load_model(&config, checkpoint_dir.as_deref(), &device)?;

    println!("🎤 RustRNNT - Speech Recognition");
    println!("Audio file: {}", audio_path.display());

    let start = Instant::now();
    let samples = load_audio(&audio_path, config.speech.sample_rate)?;
    let audio_secs = samples.len() as f64 / config.speech.sample_rate as f64;

    let features = extractor.extract(&samples, &device)?;
    let tokens = match beam_width {
        Some(width) => model.recognize_beam(&features.tensor, width)?,
        None => model.recognize(&features.tensor)?,
    };
    let transcript = text.iextract(&tokens);

    let result = TranscriptionResult::new(transcript, start.elapsed().as_secs_f64(), audio_secs);
    info!(
        "{:.1}с аудио за {:.1}с инференса, RTF={:.3}",
        result.audio_duration_secs, result.inference_time_secs, result.rtf
    );

    println!();
    println!("{}", result.text);

    if let Some(path) = out_text {
        std::fs::write(&path, &result.text)?;
        println!("Saved: {}", path.display());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Stream
// ---------------------------------------------------------------------------

fn run_stream(
    config_path: PathBuf,
    checkpoint_dir: Option<PathBuf>,
    audio_path: PathBuf,
    device: &str,
    chunk_ms: usize,
) -> Result<()> {
    let config = Config::from_file(&config_path)?;
    let device = create_device(device)?;
    let (model, text, extractor) = load_model(&config, checkpoint_dir.as_deref(), &device)?;

    println!("🎤 RustRNNT - Streaming Recognition ({chunk_ms}ms chunks)");

    let samples = load_audio(&audio_path, config.speech.sample_rate)?;
    let chunk_samples = (config.speech.sample_rate * chunk_ms / 1000).max(1);

    let mut session = model.streaming_session()?;
    let mut stdout = std::io::stdout();

    for chunk in samples.chunks(chunk_samples) {
        let features = extractor.extract(chunk, &device)?;
        if features.num_frames == 0 {
            continue;
        }
        let fresh = session.feed(&features.tensor)?;
        if !fresh.is_empty() {
            print!("{}", text.iextract(&fresh));
            stdout.flush()?;
        }
    }

    println!();
    println!("---");
    println!("{}", text.iextract(session.tokens()));
    Ok(())
}

// ---------------------------------------------------------------------------
// Общие помощники
// ---------------------------------------------------------------------------

/// WAV → mono → ресемплинг к частоте модели.
fn load_audio(path: &Path, sample_rate: usize) -> Result<Vec<f32>> {
    let buffer = load_wav(path)?;
    info!(
        "Аудио: {:.2}с, {} Гц, {} канал(ов)",
        buffer.duration(),
        buffer.sample_rate,
        buffer.channels
    );
    let mono = to_mono(&buffer);
    let resampled = Resampler::new(sample_rate).resample(&mono)?;
    Ok(resampled.samples)
}

/// Построить модель и загрузить последний чекпоинт.
fn load_model(
    config: &Config,
    checkpoint_dir: Option<&Path>,
    device: &Device,
) -> Result<(StreamingTransducer, CharFeaturizer, FeatureExtractor)> {
    let text = CharFeaturizer::from_config(&config.text)?;
    let extractor = FeatureExtractor::new(&config.speech);

    // Чекпоинты сохраняются в dtype обучения (F32 вне CUDA+mxp);
    // восстановление требует того же dtype
    let mut varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
    let model = StreamingTransducer::new(
        &config.model,
        config.speech.num_feature_bins,
        text.num_classes(),
        vb,
    )?;

    let ckpt_dir = checkpoint_dir.unwrap_or(&config.learning.running.checkpoint_dir);
    let manager = CheckpointManager::new(ckpt_dir, usize::MAX)?;
    let step = manager
        .restore_latest(&mut varmap)?
        .ok_or_else(|| anyhow!("Нет чекпоинтов в {:?} — сначала обучите модель", ckpt_dir))?;
    info!("Модель загружена: шаг {step}");

    Ok((model, text, extractor))
}

fn create_device(device: &str) -> Result<Device> {
    match device {
        "metal" => Ok(Device::new_metal(0)?),
        "cuda" => Ok(Device::new_cuda(0)?),
        _ => Ok(Device::Cpu),
    }
}
