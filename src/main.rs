use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use crossfill::{
    load_font, render_grid, save_image, ArcScope, Puzzle, Solver, SolverOptions, WordList,
};
use log::{info, warn};

/// Fill a crossword structure with words from a word list.
#[derive(Debug, Parser)]
#[command(name = "crossfill", version)]
struct Args {
    /// Structure file: `_` for open cells, `#` for blocks
    structure: PathBuf,

    /// Word list, one word per line
    words: PathBuf,

    /// Also write the filled grid to this file, as an image if it ends in `.png`
    output: Option<PathBuf>,

    /// TrueType font for the letters of an image output
    #[arg(long, default_value = "assets/fonts/OpenSans-Regular.ttf")]
    font: PathBuf,

    /// Shrink the trial slot to its chosen word before propagating
    #[arg(long)]
    fix_trial_word: bool,

    /// Only propagate from the slot that was just assigned
    #[arg(long)]
    local_arcs: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let puzzle = Puzzle::load(&args.structure)?;
    let words = WordList::load(&args.words)?;

    let options = SolverOptions {
        fix_trial_word: args.fix_trial_word,
        arc_scope: if args.local_arcs { ArcScope::Neighbors } else { ArcScope::Global },
    };

    match Solver::with_options(&puzzle, &words, options).find_fill() {
        Ok(result) => {
            let display_grid = render_grid(&puzzle, &words, &result.assignment);

            info!("{:?}", result.statistics);
            println!("{}", display_grid);

            if let Some(output) = &args.output {
                let is_png = output
                    .extension()
                    .map_or(false, |ext| ext.eq_ignore_ascii_case("png"));

                if is_png {
                    let font = match load_font(&args.font) {
                        Ok(font) => Some(font),
                        Err(err) => {
                            warn!("{}; drawing the grid without letters", err);
                            None
                        }
                    };
                    save_image(&puzzle, &words, &result.assignment, font.as_ref(), output)
                        .with_context(|| format!("unable to write {}", output.display()))?;
                } else {
                    fs::write(output, &display_grid)
                        .with_context(|| format!("unable to write {}", output.display()))?;
                }
                info!("written grid to {}", output.display());
            }
        }
        Err(failure) => {
            info!("{:?}", failure.statistics);
            println!("No solution.");
        }
    }

    Ok(())
}
