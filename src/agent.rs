use std::collections::HashSet;

use log::{debug, info};
use rand::{rngs::StdRng, seq::IteratorRandom, SeedableRng};
use strum::IntoEnumIterator;

use crate::{
    decay::{self, Decay},
    error::ConfigError,
    event::{Event, Outcome, Sink},
    exploration::{Choice, EpsilonGreedy},
    grid::{Circus, Dir, Pos, Tile, ACTION_COUNT},
    table::QTable,
};

/// Configuration for the [`QTableAgent`]
pub struct QTableAgentConfig<D: Decay> {
    pub exploration: EpsilonGreedy<D>,
    /// Learning rate
    pub alpha: f32,
    /// Discount factor
    pub gamma: f32,
    /// Steps after which an episode is truncated instead of looping forever
    pub step_cap: u32,
    /// Outer iteration budget for [`QTableAgent::train_batch`]
    pub max_episodes: u32,
    /// Rollouts per outer iteration, all sharing the value table
    pub clowns: u32,
    /// Average value change below which batch training stops early
    pub convergence_threshold: f32,
    /// Seed for the agent's random source
    pub seed: u64,
}

impl Default for QTableAgentConfig<decay::Constant> {
    fn default() -> Self {
        Self {
            exploration: EpsilonGreedy::new(decay::Constant::new(0.2)),
            alpha: 0.1,
            gamma: 0.9,
            step_cap: 10_000,
            max_episodes: 1000,
            clowns: 20,
            convergence_threshold: 0.01,
            seed: 0,
        }
    }
}

/// What a batch training run did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrainingSummary {
    /// Outer training iterations actually run
    pub episodes: u32,
    /// Whether the average value change fell below the threshold before the
    /// episode budget ran out
    pub converged: bool,
}

/// A Q-learning clown that learns a [`Circus`] through a shared value table
///
/// The agent exclusively owns the table. Batch training runs its clowns as
/// strictly sequential rollouts over that one table, so each rollout sees
/// every update the previous one made. All randomness flows through one
/// seeded generator, making whole runs reproducible.
pub struct QTableAgent<D: Decay> {
    table: QTable,
    exploration: EpsilonGreedy<D>,
    alpha: f32,
    gamma: f32,
    step_cap: u32,
    max_episodes: u32,
    clowns: u32,
    convergence_threshold: f32,
    rng: StdRng,
    episode: u32,
    score: f32,
    high_score: f32,
    successes: u32,
}

fn check_interval(name: &'static str, value: f32) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfInterval { name, value })
    }
}

fn check_nonzero(name: &'static str, value: u32) -> Result<(), ConfigError> {
    if value > 0 {
        Ok(())
    } else {
        Err(ConfigError::ZeroCount(name))
    }
}

impl<D: Decay> QTableAgent<D> {
    /// Initialize an agent, validating the configuration
    pub fn new(config: QTableAgentConfig<D>) -> Result<Self, ConfigError> {
        let QTableAgentConfig {
            exploration,
            alpha,
            gamma,
            step_cap,
            max_episodes,
            clowns,
            convergence_threshold,
            seed,
        } = config;

        check_interval("alpha", alpha)?;
        check_interval("gamma", gamma)?;
        check_interval("epsilon", exploration.epsilon(0))?;
        check_nonzero("step_cap", step_cap)?;
        check_nonzero("max_episodes", max_episodes)?;
        check_nonzero("clowns", clowns)?;

        Ok(Self {
            table: QTable::new(),
            exploration,
            alpha,
            gamma,
            step_cap,
            max_episodes,
            clowns,
            convergence_threshold,
            rng: StdRng::seed_from_u64(seed),
            episode: 0,
            score: 0.0,
            high_score: f32::NEG_INFINITY,
            successes: 0,
        })
    }

    fn act(&mut self, pos: Pos) -> Dir {
        match self.exploration.choose(self.episode, &mut self.rng) {
            Choice::Explore => Dir::iter()
                .choose(&mut self.rng)
                .expect("there is always at least one direction"),
            Choice::Exploit => self.table.best_action(pos),
        }
    }

    /// One trajectory from start to a terminal tile or the step cap,
    /// returning the outcome and the summed absolute value change
    fn rollout(&mut self, circus: &mut Circus, sink: &mut impl Sink) -> (Outcome, f32) {
        let mut pos = circus.start();
        let mut change = 0.0;
        let mut outcome = Outcome::Truncated;

        for _ in 0..self.step_cap {
            let action = self.act(pos);
            let next = circus.step(pos, action);
            let tile = circus.tile(next);
            let reward = circus.reward(tile);
            if circus.collect(next) {
                self.score += reward;
            }

            change += self
                .table
                .update(pos, action, next, reward, self.alpha, self.gamma)
                .abs();
            sink.emit(Event::Step {
                from: pos,
                action,
                to: next,
                reward,
                row: self.table.row(pos),
            });

            pos = next;
            if circus.is_terminal(tile) {
                outcome = if tile == Tile::Goal {
                    Outcome::Goal
                } else {
                    Outcome::Hazard
                };
                break;
            }
        }

        match outcome {
            Outcome::Goal => {
                self.successes += 1;
                self.high_score = self.high_score.max(self.score);
            }
            Outcome::Hazard => {
                self.score = 0.0;
                circus.restore_popcorn();
            }
            Outcome::Truncated => {}
        }
        self.episode += 1;
        sink.emit(Event::Episode {
            outcome,
            score: self.score,
            high_score: self.high_score,
            successes: self.successes,
        });

        (outcome, change)
    }

    /// Run a single training episode from the circus start
    pub fn run_episode(&mut self, circus: &mut Circus, sink: &mut impl Sink) -> Outcome {
        self.rollout(circus, sink).0
    }

    /// Train a troupe of clowns on the shared value table
    ///
    /// Each outer iteration runs [`clowns`](QTableAgentConfig::clowns)
    /// sequential rollouts, sums the absolute value changes they made, and
    /// divides by `size² × 4`. Training stops at the first iteration whose
    /// average change falls below the convergence threshold, or after
    /// [`max_episodes`](QTableAgentConfig::max_episodes) iterations.
    pub fn train_batch(&mut self, circus: &mut Circus, sink: &mut impl Sink) -> TrainingSummary {
        let denominator = (circus.size() * circus.size() * ACTION_COUNT) as f32;
        let mut episodes = 0;
        let mut converged = false;

        for _ in 0..self.max_episodes {
            let mut total_change = 0.0;
            for _ in 0..self.clowns {
                let (_, change) = self.rollout(circus, sink);
                total_change += change;
            }
            episodes += 1;

            let avg_change = total_change / denominator;
            debug!("batch {episodes}: average value change {avg_change:.6}");
            if avg_change < self.convergence_threshold {
                info!("converged after {episodes} episodes");
                converged = true;
                break;
            }
        }

        sink.emit(Event::Batch { episodes, converged });
        TrainingSummary { episodes, converged }
    }

    /// The greedy action at `pos`, without exploration
    pub fn best_action(&self, pos: Pos) -> Dir {
        self.table.best_action(pos)
    }

    /// Walk the greedy policy from the circus start, stopping on a cycle or
    /// on a position the table has never seen
    ///
    /// **Returns** the visited positions, start and goal inclusive, or
    /// `None` if the walk does not reach the goal.
    pub fn learned_path(&self, circus: &Circus) -> Option<Vec<Pos>> {
        let mut pos = circus.start();
        let mut path = vec![pos];
        let mut visited = HashSet::new();

        while pos != circus.goal() {
            if !self.table.contains(pos) || !visited.insert(pos) {
                return None;
            }
            let next = circus.step(pos, self.table.best_action(pos));
            if visited.contains(&next) {
                return None;
            }
            path.push(next);
            pos = next;
        }

        Some(path)
    }

    pub fn table(&self) -> &QTable {
        &self.table
    }

    /// Popcorn points accumulated since the last hazard death
    pub fn score(&self) -> f32 {
        self.score
    }

    /// The best score held when reaching the goal
    pub fn high_score(&self) -> f32 {
        self.high_score
    }

    /// Goal arrivals since the last [`reset`](QTableAgent::reset)
    pub fn successes(&self) -> u32 {
        self.successes
    }

    /// Episodes completed so far
    pub fn episode(&self) -> u32 {
        self.episode
    }

    /// Forget everything learned: clear the table and the run accounting,
    /// for retraining on a freshly generated circus
    pub fn reset(&mut self) {
        self.table.clear();
        self.episode = 0;
        self.score = 0.0;
        self.high_score = f32::NEG_INFINITY;
        self.successes = 0;
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;
    use crate::{
        event::Discard,
        grid::{CircusConfig, HazardRule},
    };

    fn layout(size: usize, tiles: &[(Pos, Tile)]) -> Vec<Tile> {
        let mut cells = vec![Tile::Empty; size * size];
        for &((row, col), tile) in tiles {
            cells[row * size + col] = tile;
        }
        cells
    }

    fn greedy_agent(step_cap: u32) -> QTableAgent<decay::Constant> {
        QTableAgent::new(QTableAgentConfig {
            exploration: EpsilonGreedy::new(decay::Constant::new(0.0)),
            step_cap,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn greedy_episode_takes_the_manhattan_path() {
        let cells = layout(5, &[((0, 0), Tile::Start), ((4, 4), Tile::Goal)]);
        let mut circus = Circus::from_layout(5, cells, HazardRule::Blocking).unwrap();

        let mut agent = greedy_agent(100);
        // Up everywhere, overridden by Right along the top row and Down
        // along the last column
        for row in 0..5 {
            for col in 0..5 {
                agent.table.row_mut((row, col))[Dir::Up as usize] = 1.0;
            }
        }
        for col in 0..4 {
            agent.table.row_mut((0, col))[Dir::Right as usize] = 2.0;
        }
        for row in 0..4 {
            agent.table.row_mut((row, 4))[Dir::Down as usize] = 2.0;
        }

        let mut events: Vec<Event> = Vec::new();
        let outcome = agent.run_episode(&mut circus, &mut events);

        assert_eq!(outcome, Outcome::Goal);
        let steps = events
            .iter()
            .filter(|e| matches!(e, Event::Step { .. }))
            .count();
        assert_eq!(steps, 8, "Goal reached in the Manhattan-minimal steps");
    }

    #[test]
    fn goal_keeps_popcorn_collected_and_counts_success() {
        let cells = layout(
            3,
            &[
                ((0, 0), Tile::Start),
                ((0, 1), Tile::Popcorn),
                ((0, 2), Tile::Goal),
            ],
        );
        let mut circus = Circus::from_layout(3, cells, HazardRule::Blocking).unwrap();

        let mut agent = greedy_agent(100);
        for row in 0..3 {
            for col in 0..3 {
                agent.table.row_mut((row, col))[Dir::Right as usize] = 2.0;
            }
        }

        let outcome = agent.run_episode(&mut circus, &mut Discard);
        assert_eq!(outcome, Outcome::Goal);
        assert_eq!(
            circus.tile((0, 1)),
            Tile::Empty,
            "Popcorn stays collected after a goal"
        );
        assert_eq!(agent.score(), 5.0);
        assert_eq!(agent.high_score(), 5.0);
        assert_eq!(agent.successes(), 1);
    }

    #[test]
    fn hazard_restores_popcorn_and_zeroes_the_score() {
        let cells = layout(
            3,
            &[
                ((0, 0), Tile::Start),
                ((0, 1), Tile::Popcorn),
                ((0, 2), Tile::Fire),
                ((2, 2), Tile::Goal),
            ],
        );
        let mut circus = Circus::from_layout(3, cells, HazardRule::Blocking).unwrap();

        let mut agent = greedy_agent(100);
        for row in 0..3 {
            for col in 0..3 {
                agent.table.row_mut((row, col))[Dir::Right as usize] = 2.0;
            }
        }

        let mut events: Vec<Event> = Vec::new();
        let outcome = agent.run_episode(&mut circus, &mut events);

        assert_eq!(outcome, Outcome::Hazard);
        assert_eq!(
            circus.tile((0, 1)),
            Tile::Popcorn,
            "Popcorn restored after a hazard death"
        );
        assert_eq!(agent.score(), 0.0);
        assert_eq!(agent.successes(), 0);
        assert_eq!(
            events.last(),
            Some(&Event::Episode {
                outcome: Outcome::Hazard,
                score: 0.0,
                high_score: f32::NEG_INFINITY,
                successes: 0,
            }),
        );
    }

    #[test]
    fn unreachable_goal_truncates() {
        let cells = layout(2, &[((0, 0), Tile::Start), ((1, 1), Tile::Goal)]);
        let mut circus = Circus::from_layout(2, cells, HazardRule::Blocking).unwrap();

        // Greedy on an all-zero table keeps choosing Up against the wall
        let mut agent = greedy_agent(10);
        let outcome = agent.run_episode(&mut circus, &mut Discard);
        assert_eq!(outcome, Outcome::Truncated);
        assert_eq!(agent.episode(), 1, "Truncated episodes still count");
    }

    #[test]
    fn train_batch_halts_on_convergence() {
        let cells = layout(2, &[((0, 0), Tile::Start), ((1, 1), Tile::Goal)]);
        let mut circus = Circus::from_layout(2, cells, HazardRule::Blocking).unwrap();

        // Pinned against the wall every change is zero, so the very first
        // iteration is below threshold
        let mut agent = QTableAgent::new(QTableAgentConfig {
            exploration: EpsilonGreedy::new(decay::Constant::new(0.0)),
            step_cap: 10,
            max_episodes: 50,
            clowns: 2,
            ..Default::default()
        })
        .unwrap();

        let mut events: Vec<Event> = Vec::new();
        let summary = agent.train_batch(&mut circus, &mut events);

        assert_eq!(
            summary,
            TrainingSummary {
                episodes: 1,
                converged: true,
            },
        );
        assert_eq!(
            events.last(),
            Some(&Event::Batch {
                episodes: 1,
                converged: true,
            }),
        );
    }

    #[test]
    fn train_batch_respects_the_episode_budget() {
        let cells = layout(2, &[((0, 0), Tile::Start), ((1, 1), Tile::Goal)]);
        let mut circus = Circus::from_layout(2, cells, HazardRule::Blocking).unwrap();

        let mut agent = QTableAgent::new(QTableAgentConfig {
            exploration: EpsilonGreedy::new(decay::Constant::new(0.0)),
            step_cap: 10,
            max_episodes: 5,
            clowns: 2,
            convergence_threshold: 0.0,
            ..Default::default()
        })
        .unwrap();

        let summary = agent.train_batch(&mut circus, &mut Discard);
        assert_eq!(
            summary,
            TrainingSummary {
                episodes: 5,
                converged: false,
            },
            "A zero threshold never triggers the early exit"
        );
    }

    #[test]
    fn clowns_share_one_table_sequentially() {
        let cells = layout(
            3,
            &[((0, 0), Tile::Start), ((0, 1), Tile::Popcorn), ((0, 2), Tile::Goal)],
        );
        let mut circus = Circus::from_layout(3, cells, HazardRule::Blocking).unwrap();

        let mut agent = QTableAgent::new(QTableAgentConfig {
            exploration: EpsilonGreedy::new(decay::Constant::new(0.0)),
            step_cap: 4,
            max_episodes: 1,
            clowns: 2,
            ..Default::default()
        })
        .unwrap();
        for col in 0..3 {
            agent.table.row_mut((0, col))[Dir::Right as usize] = 2.0;
        }
        let first_clown_value = {
            let mut probe = agent.table.clone();
            probe.update((0, 0), Dir::Right, (0, 1), 5.0, 0.1, 0.9);
            probe.row((0, 0))[Dir::Right as usize]
        };

        let mut events: Vec<Event> = Vec::new();
        agent.train_batch(&mut circus, &mut events);

        let rows = events
            .iter()
            .filter_map(|e| match e {
                Event::Step { from: (0, 0), row, .. } => Some(row[Dir::Right as usize]),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(rows.len(), 2, "Both clowns left the start cell once");
        assert_eq!(rows[0], first_clown_value);
        assert!(
            rows[1] != rows[0],
            "The second clown builds on the first clown's update"
        );
    }

    #[test]
    fn full_exploration_draws_every_direction() {
        let mut agent = QTableAgent::new(QTableAgentConfig {
            exploration: EpsilonGreedy::new(decay::Constant::new(1.0)),
            ..Default::default()
        })
        .unwrap();

        let mut counts = [0usize; ACTION_COUNT];
        for _ in 0..4000 {
            counts[agent.act((1, 1)) as usize] += 1;
        }
        for (dir, count) in counts.iter().enumerate() {
            assert!(
                (900..=1100).contains(count),
                "Direction {dir} drawn {count} times out of 4000"
            );
        }
    }

    #[test]
    fn learned_path_is_none_before_training() {
        let cells = layout(3, &[((0, 0), Tile::Start), ((2, 2), Tile::Goal)]);
        let circus = Circus::from_layout(3, cells, HazardRule::Blocking).unwrap();
        let agent = greedy_agent(10);
        assert_eq!(agent.learned_path(&circus), None);
    }

    #[test]
    fn learned_path_reaches_the_goal_after_training() {
        let mut rng = StdRng::seed_from_u64(13);
        let config = CircusConfig {
            size: 5,
            hazards: 0,
            hazard_rule: HazardRule::Blocking,
        };
        let mut circus = Circus::generate(&config, &mut rng).unwrap();

        let mut agent = QTableAgent::new(QTableAgentConfig {
            max_episodes: 500,
            convergence_threshold: 0.001,
            seed: 13,
            ..Default::default()
        })
        .unwrap();
        agent.train_batch(&mut circus, &mut Discard);

        let path = agent.learned_path(&circus).expect("a path was learned");
        assert_eq!(path[0], circus.start());
        assert_eq!(*path.last().unwrap(), circus.goal());

        let (start, goal) = (circus.start(), circus.goal());
        let manhattan = start.0.abs_diff(goal.0) + start.1.abs_diff(goal.1);
        assert!(path.len() >= manhattan + 1, "Path is at least Manhattan-long");
    }

    #[test]
    fn reset_forgets_the_run() {
        let cells = layout(
            3,
            &[
                ((0, 0), Tile::Start),
                ((0, 1), Tile::Popcorn),
                ((0, 2), Tile::Goal),
            ],
        );
        let mut circus = Circus::from_layout(3, cells, HazardRule::Blocking).unwrap();

        let mut agent = greedy_agent(100);
        for col in 0..3 {
            agent.table.row_mut((0, col))[Dir::Right as usize] = 2.0;
        }
        agent.run_episode(&mut circus, &mut Discard);
        assert!(agent.successes() > 0);
        assert!(!agent.table.is_empty());

        agent.reset();
        assert!(agent.table.is_empty(), "Reset clears the table");
        assert_eq!(agent.episode(), 0);
        assert_eq!(agent.score(), 0.0);
        assert_eq!(agent.high_score(), f32::NEG_INFINITY);
        assert_eq!(agent.successes(), 0);
    }

    #[test]
    fn config_is_validated() {
        let bad_alpha = QTableAgentConfig {
            alpha: 1.5,
            ..Default::default()
        };
        assert_eq!(
            QTableAgent::new(bad_alpha).err(),
            Some(ConfigError::OutOfInterval {
                name: "alpha",
                value: 1.5,
            }),
        );

        let bad_epsilon = QTableAgentConfig {
            exploration: EpsilonGreedy::new(decay::Constant::new(2.0)),
            ..Default::default()
        };
        assert_eq!(
            QTableAgent::new(bad_epsilon).err(),
            Some(ConfigError::OutOfInterval {
                name: "epsilon",
                value: 2.0,
            }),
        );

        let no_clowns = QTableAgentConfig {
            clowns: 0,
            ..Default::default()
        };
        assert_eq!(
            QTableAgent::new(no_clowns).err(),
            Some(ConfigError::ZeroCount("clowns")),
        );
    }
}
