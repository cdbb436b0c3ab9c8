use rand::{seq::SliceRandom, Rng};
use strum::{EnumIter, FromRepr, VariantArray};

use crate::error::ConfigError;

/// Position coordinates in the circus as `(row, col)`
pub type Pos = (usize, usize);

/// Number of directions a clown can move in
pub const ACTION_COUNT: usize = 4;

/// A movement direction with a deterministic, bounds-clamped effect
#[derive(EnumIter, VariantArray, FromRepr, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dir {
    Up = 0,
    Down = 1,
    Left = 2,
    Right = 3,
}

/// What occupies a cell of the circus
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tile {
    Empty,
    Start,
    Goal,
    Fire,
    Elephant,
    Popcorn,
}

const HAZARD_KINDS: [Tile; 3] = [Tile::Fire, Tile::Elephant, Tile::Popcorn];

/// How elephant cells behave
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HazardRule {
    /// An elephant rejects movement into its cell and never ends an episode
    #[default]
    Blocking,
    /// An elephant cell can be entered, costs its penalty, and ends the episode
    Terminal,
}

/// Layout parameters for [`Circus::generate`]
#[derive(Clone, Copy, Debug)]
pub struct CircusConfig {
    pub size: usize,
    pub hazards: usize,
    pub hazard_rule: HazardRule,
}

impl Default for CircusConfig {
    fn default() -> Self {
        Self {
            size: 5,
            hazards: 5,
            hazard_rule: HazardRule::Blocking,
        }
    }
}

/// A square grid the clown crosses from its start tile to the goal,
/// around fire, elephants, and popcorn
///
/// The layout is fixed at construction except for popcorn: collecting it
/// empties the cell, and [`restore_popcorn`](Circus::restore_popcorn)
/// re-seeds it from a pristine copy of the layout.
#[derive(Clone, Debug, PartialEq)]
pub struct Circus {
    size: usize,
    cells: Vec<Tile>,
    pristine: Vec<Tile>,
    start: Pos,
    goal: Pos,
    hazard_rule: HazardRule,
}

impl Circus {
    /// Lay out a random circus: one start, one goal, and `hazards` cells of
    /// random kind, each re-rolled until it lands on an empty cell.
    ///
    /// Deterministic for a given `rng` state.
    pub fn generate(config: &CircusConfig, rng: &mut impl Rng) -> Result<Self, ConfigError> {
        let &CircusConfig {
            size,
            hazards,
            hazard_rule,
        } = config;
        if size < 2 {
            return Err(ConfigError::GridTooSmall(size));
        }
        if hazards >= size * size - 2 {
            return Err(ConfigError::TooManyHazards { size, hazards });
        }

        let mut cells = vec![Tile::Empty; size * size];
        let start = (rng.gen_range(0..size), rng.gen_range(0..size));
        let mut goal = start;
        while goal == start {
            goal = (rng.gen_range(0..size), rng.gen_range(0..size));
        }
        cells[start.0 * size + start.1] = Tile::Start;
        cells[goal.0 * size + goal.1] = Tile::Goal;

        for _ in 0..hazards {
            loop {
                let i = rng.gen_range(0..size) * size + rng.gen_range(0..size);
                if cells[i] == Tile::Empty {
                    cells[i] = *HAZARD_KINDS.choose(rng).expect("kind set is not empty");
                    break;
                }
            }
        }

        Ok(Self {
            size,
            pristine: cells.clone(),
            cells,
            start,
            goal,
            hazard_rule,
        })
    }

    /// Build a circus from an explicit row-major layout of `size * size`
    /// tiles containing exactly one start and one goal.
    pub fn from_layout(
        size: usize,
        layout: Vec<Tile>,
        hazard_rule: HazardRule,
    ) -> Result<Self, ConfigError> {
        if size < 2 {
            return Err(ConfigError::GridTooSmall(size));
        }
        if layout.len() != size * size {
            return Err(ConfigError::LayoutSize {
                size,
                len: layout.len(),
            });
        }

        let mut start = None;
        let mut goal = None;
        for (i, tile) in layout.iter().enumerate() {
            let pos = (i / size, i % size);
            match tile {
                Tile::Start if start.is_none() => start = Some(pos),
                Tile::Goal if goal.is_none() => goal = Some(pos),
                Tile::Start | Tile::Goal => return Err(ConfigError::LayoutAnchors),
                _ => {}
            }
        }
        let (Some(start), Some(goal)) = (start, goal) else {
            return Err(ConfigError::LayoutAnchors);
        };

        Ok(Self {
            size,
            pristine: layout.clone(),
            cells: layout,
            start,
            goal,
            hazard_rule,
        })
    }

    fn idx(&self, pos: Pos) -> usize {
        pos.0 * self.size + pos.1
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn start(&self) -> Pos {
        self.start
    }

    pub fn goal(&self) -> Pos {
        self.goal
    }

    pub fn hazard_rule(&self) -> HazardRule {
        self.hazard_rule
    }

    pub fn tile(&self, pos: Pos) -> Tile {
        self.cells[self.idx(pos)]
    }

    /// Apply `dir` from `pos`, clamped to the grid bounds. Under
    /// [`HazardRule::Blocking`] a move into an elephant cell is rejected
    /// and `pos` is returned unchanged.
    pub fn step(&self, pos: Pos, dir: Dir) -> Pos {
        let (row, col) = pos;
        let max = self.size - 1;
        let dest = match dir {
            Dir::Up => (row.saturating_sub(1), col),
            Dir::Down => ((row + 1).min(max), col),
            Dir::Left => (row, col.saturating_sub(1)),
            Dir::Right => (row, (col + 1).min(max)),
        };

        if self.hazard_rule == HazardRule::Blocking && self.tile(dest) == Tile::Elephant {
            pos
        } else {
            dest
        }
    }

    /// Reward for landing on a tile kind
    pub fn reward(&self, tile: Tile) -> f32 {
        match tile {
            Tile::Empty => -1.0,
            Tile::Start => 0.0,
            Tile::Goal => 10.0,
            Tile::Fire => -10.0,
            Tile::Elephant => -5.0,
            Tile::Popcorn => 5.0,
        }
    }

    /// Whether landing on a tile kind ends the episode
    pub fn is_terminal(&self, tile: Tile) -> bool {
        match tile {
            Tile::Goal | Tile::Fire => true,
            Tile::Elephant => self.hazard_rule == HazardRule::Terminal,
            _ => false,
        }
    }

    /// Pick up popcorn at `pos`, leaving the cell empty. Returns whether
    /// there was popcorn to take.
    pub fn collect(&mut self, pos: Pos) -> bool {
        let i = self.idx(pos);
        let taken = self.cells[i] == Tile::Popcorn;
        if taken {
            self.cells[i] = Tile::Empty;
        }
        taken
    }

    /// Put collected popcorn back where the pristine layout had it
    pub fn restore_popcorn(&mut self) {
        for (cell, original) in self.cells.iter_mut().zip(&self.pristine) {
            if *original == Tile::Popcorn && *cell == Tile::Empty {
                *cell = Tile::Popcorn;
            }
        }
    }
}
