use clap::{Parser, Subcommand};
use eyre::WrapErr;
use std::path::PathBuf;

use stereo_rectify::{Interpolation, RectifyConfig, RectifyMode, StereoRectifier};

#[derive(Debug, Parser)]
#[command(name = "stereo-rectify-cli")]
#[command(author, version)]
struct Opt {
    /// Calibration filename (.json, .ini, .yaml)
    calibration: PathBuf,

    /// Output size as WIDTHxHEIGHT (default: calibrated size)
    #[arg(long, value_parser = parse_size)]
    size: Option<(u32, u32)>,

    /// Rectification mode ("conventional" or "pseudo")
    #[arg(long, default_value_t = RectifyMode::Conventional)]
    mode: RectifyMode,

    /// Zero the intrinsics skew terms before rectifying
    #[arg(long)]
    triangular: bool,

    /// The command to run. Defaults to "summary".
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the rectified calibration as YAML
    Summary,
    /// Rectify an image pair
    Rectify {
        /// Left input image
        left: PathBuf,
        /// Right input image
        right: PathBuf,
        /// Resampling method ("nearest" or "cubic")
        #[arg(long, default_value = "nearest", value_parser = parse_interpolation)]
        interpolation: Interpolation,
        /// Rectified left output path
        #[arg(long, default_value = "left-rect.png")]
        left_out: PathBuf,
        /// Rectified right output path
        #[arg(long, default_value = "right-rect.png")]
        right_out: PathBuf,
    },
}

fn parse_size(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {s:?}"))?;
    let w = w.parse().map_err(|e| format!("bad width: {e}"))?;
    let h = h.parse().map_err(|e| format!("bad height: {e}"))?;
    Ok((w, h))
}

fn parse_interpolation(s: &str) -> Result<Interpolation, String> {
    match s {
        "nearest" => Ok(Interpolation::Nearest),
        "cubic" => Ok(Interpolation::Cubic),
        other => Err(format!(
            "unknown interpolation {other:?} (expected \"nearest\" or \"cubic\")"
        )),
    }
}

fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let opt = Opt::parse();
    let command = opt.command.unwrap_or(Commands::Summary);

    let mut config = RectifyConfig {
        target_size: opt.size,
        mode: opt.mode,
        triangular_intrinsics: opt.triangular,
        ..Default::default()
    };
    if let Commands::Rectify { interpolation, .. } = &command {
        config.interpolation = *interpolation;
    }

    let rectifier = StereoRectifier::from_calibration_file(&opt.calibration, config)
        .wrap_err_with(|| format!("loading calibration {}", opt.calibration.display()))?;

    match command {
        Commands::Summary => {
            let yaml_buf = serde_yaml::to_string(&rectifier.rectified_calibration())?;
            println!("{}", yaml_buf);
        }
        Commands::Rectify {
            left,
            right,
            left_out,
            right_out,
            ..
        } => {
            let limg = image::open(&left)
                .wrap_err_with(|| format!("reading {}", left.display()))?
                .to_rgb8();
            let rimg = image::open(&right)
                .wrap_err_with(|| format!("reading {}", right.display()))?
                .to_rgb8();
            let (lrect, rrect) = rectifier.rectify(&limg, &rimg)?;
            lrect
                .save(&left_out)
                .wrap_err_with(|| format!("writing {}", left_out.display()))?;
            rrect
                .save(&right_out)
                .wrap_err_with(|| format!("writing {}", right_out.display()))?;
            tracing::info!(
                "wrote {} and {}",
                left_out.display(),
                right_out.display()
            );
        }
    }

    Ok(())
}
