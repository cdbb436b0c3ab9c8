use std::{error::Error, fs, path::Path};

use bigtop::{
    agent::{QTableAgent, QTableAgentConfig},
    decay,
    event::{Event, Outcome, Sink},
    exploration::EpsilonGreedy,
    grid::{Circus, CircusConfig},
};
use rand::{rngs::StdRng, SeedableRng};

const SEED: u64 = 7;

/// Keeps one row per finished episode, dropping the step stream
struct EpisodeLog(Vec<(Outcome, f32)>);

impl Sink for EpisodeLog {
    fn emit(&mut self, event: Event) {
        if let Event::Episode { outcome, score, .. } = event {
            self.0.push((outcome, score));
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let path = Path::new("demos");
    fs::create_dir_all(path.join("out"))?;

    let mut rng = StdRng::seed_from_u64(SEED);
    let mut circus = Circus::generate(&CircusConfig::default(), &mut rng)?;

    let mut agent = QTableAgent::new(QTableAgentConfig {
        exploration: EpsilonGreedy::new(decay::Exponential::new(5e-3, 0.5, 0.05)?),
        alpha: 0.1,
        gamma: 0.9,
        step_cap: 10_000,
        max_episodes: 1000,
        clowns: 20,
        convergence_threshold: 0.01,
        seed: SEED,
    })?;

    let mut log = EpisodeLog(Vec::new());
    let summary = agent.train_batch(&mut circus, &mut log);

    let mut wtr = csv::Writer::from_path(path.join("out/episodes.csv"))?;
    wtr.write_record(["episode", "outcome", "score"])?;
    for (i, (outcome, score)) in log.0.iter().enumerate() {
        let outcome = match outcome {
            Outcome::Goal => "goal",
            Outcome::Hazard => "hazard",
            Outcome::Truncated => "truncated",
        };
        wtr.write_record([(i + 1).to_string(), outcome.to_string(), score.to_string()])?;
    }
    wtr.flush()?;

    println!(
        "trained for {} batch episodes (converged: {}), {} goal arrivals",
        summary.episodes,
        summary.converged,
        agent.successes()
    );
    match agent.learned_path(&circus) {
        Some(path) => println!("learned path: {path:?}"),
        None => println!("no greedy path reaches the goal yet"),
    }

    Ok(())
}
