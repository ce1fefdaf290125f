use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt::{Debug, Formatter};
use std::fs;
use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use bit_set::BitSet;
use image::{ImageResult, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use instant::{Duration, Instant};
use log::{debug, info, trace};
use smallvec::SmallVec;
use thiserror::Error;

/// The expected maximum length for a single slot.
pub const MAX_SLOT_LENGTH: usize = 21;

/// Glyph used by `render_grid` for blocked cells.
pub const BLOCK_GLYPH: char = '█';

/// Width and height in pixels of one cell drawn by `render_image`.
pub const CELL_SIZE: u32 = 100;

/// Black margin left around each open cell by `render_image`.
const CELL_BORDER: u32 = 2;

const LETTER_SCALE: f32 = 80.0;

const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);
const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// An identifier for a given character, based on its index in the word list's `glyphs` field.
pub type GlyphId = usize;

/// An identifier for a given slot, based on its index in the puzzle's `slot_configs` field.
pub type SlotId = usize;

/// An identifier for a given word, based on its index in the word list's `words` field.
pub type WordId = usize;

/// Zero-indexed (row, col) coords for a cell in the grid, where row 0 is the top row.
pub type GridCoord = (usize, usize);

/// Direction that a slot is facing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    Across,
    Down,
}

/// A horizontal or vertical word slot. Two variables are the same slot iff all four fields match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Variable {
    pub row: usize,
    pub col: usize,
    pub length: usize,
    pub direction: Direction,
}

impl Variable {
    /// Generate the coords for each cell of this variable, in letter order.
    pub fn cell_coords(self) -> impl Iterator<Item = GridCoord> {
        (0..self.length).map(move |cell_idx| match self.direction {
            Direction::Across => (self.row, self.col + cell_idx),
            Direction::Down => (self.row + cell_idx, self.col),
        })
    }
}

/// A crossing between one slot and another, referencing the other slot's id and the location of
/// the intersection within the other slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crossing {
    pub other_slot_id: SlotId,
    pub other_slot_cell: usize,
}

/// The static description of one slot: its geometry plus, for each of its cells, the slot
/// crossing it there (if any).
#[derive(Debug, Clone)]
pub struct SlotConfig {
    pub id: SlotId,
    pub variable: Variable,
    pub crossings: SmallVec<[Option<Crossing>; MAX_SLOT_LENGTH]>,
}

/// Errors raised while loading a structure or a word list.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("structure has no rows")]
    EmptyStructure,

    #[error("unexpected character {glyph:?} at row {row}, column {col}")]
    UnexpectedCell { row: usize, col: usize, glyph: char },

    #[error("word list has no words")]
    EmptyWordList,

    #[error("{path:?} is not a usable font")]
    InvalidFont { path: PathBuf },
}

fn read_file(path: &Path) -> Result<String, LoadError> {
    fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// The immutable shape of a crossword: which cells are open, which slots exist, and where they
/// cross.
#[derive(Debug, Clone)]
pub struct Puzzle {
    pub height: usize,
    pub width: usize,
    pub structure: Vec<Vec<bool>>,
    pub slot_configs: Vec<SlotConfig>,
}

impl Puzzle {
    /// Build a puzzle from a matrix of open (`true`) and blocked (`false`) cells. Short rows are
    /// padded with blocks. Slots are every maximal run of two or more open cells: all across runs
    /// in row-major order, then all down runs in column-major order.
    pub fn new(mut structure: Vec<Vec<bool>>) -> Puzzle {
        let height = structure.len();
        let width = structure.iter().map(|row| row.len()).max().unwrap_or(0);
        for row in &mut structure {
            row.resize(width, false);
        }

        // (line index, start offset, length) of each run of open cells.
        fn build_runs(lines: &[Vec<bool>]) -> Vec<(usize, usize, usize)> {
            let mut result = vec![];

            for (line_idx, line) in lines.iter().enumerate() {
                let mut run_start: Option<usize> = None;

                for (idx, &open) in line.iter().chain([false].iter()).enumerate() {
                    match (open, run_start) {
                        (true, None) => run_start = Some(idx),
                        (false, Some(start)) => {
                            if idx - start > 1 {
                                result.push((line_idx, start, idx - start));
                            }
                            run_start = None;
                        }
                        _ => {}
                    }
                }
            }

            result
        }

        let transposed: Vec<Vec<bool>> = (0..width)
            .map(|col| (0..height).map(|row| structure[row][col]).collect())
            .collect();

        let mut variables: Vec<Variable> = vec![];
        for (row, col, length) in build_runs(&structure) {
            variables.push(Variable { row, col, length, direction: Direction::Across });
        }
        for (col, row, length) in build_runs(&transposed) {
            variables.push(Variable { row, col, length, direction: Direction::Down });
        }

        // Map each cell to the (slot id, cell index within slot) entries passing through it, which
        // we can then use to calculate crossings.
        let mut entries_by_cell: HashMap<GridCoord, SmallVec<[(SlotId, usize); 2]>> =
            HashMap::new();
        for (slot_id, variable) in variables.iter().enumerate() {
            for (cell_idx, loc) in variable.cell_coords().enumerate() {
                entries_by_cell.entry(loc).or_default().push((slot_id, cell_idx));
            }
        }

        let slot_configs = variables
            .into_iter()
            .enumerate()
            .map(|(slot_id, variable)| {
                let crossings = variable
                    .cell_coords()
                    .map(|loc| {
                        entries_by_cell
                            .get(&loc)
                            .and_then(|entries| {
                                entries.iter().find(|&&(other, _)| other != slot_id)
                            })
                            .map(|&(other_slot_id, other_slot_cell)| Crossing {
                                other_slot_id,
                                other_slot_cell,
                            })
                    })
                    .collect();

                SlotConfig { id: slot_id, variable, crossings }
            })
            .collect();

        Puzzle { height, width, structure, slot_configs }
    }

    /// Parse a structure from a string template, with `_` or `.` representing open cells and `#`
    /// representing blocks. Blank lines are ignored.
    pub fn from_template_str(template: &str) -> Result<Puzzle, LoadError> {
        let mut structure: Vec<Vec<bool>> = vec![];

        let lines = template.lines().map(str::trim).filter(|line| !line.is_empty());

        for (row, line) in lines.enumerate() {
            let cells = line
                .chars()
                .enumerate()
                .map(|(col, glyph)| match glyph {
                    '_' | '.' => Ok(true),
                    '#' => Ok(false),
                    glyph => Err(LoadError::UnexpectedCell { row, col, glyph }),
                })
                .collect::<Result<Vec<bool>, LoadError>>()?;

            structure.push(cells);
        }

        if structure.is_empty() {
            return Err(LoadError::EmptyStructure);
        }

        Ok(Puzzle::new(structure))
    }

    /// Read a structure file in the `from_template_str` format.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Puzzle, LoadError> {
        Puzzle::from_template_str(&read_file(path.as_ref())?)
    }

    pub fn slot_count(&self) -> usize {
        self.slot_configs.len()
    }

    pub fn variable(&self, slot_id: SlotId) -> Variable {
        self.slot_configs[slot_id].variable
    }

    pub fn variables(&self) -> impl Iterator<Item = Variable> + '_ {
        self.slot_configs.iter().map(|slot_config| slot_config.variable)
    }

    /// Find the slot id of the given variable, if it's part of this puzzle.
    pub fn slot_id(&self, variable: &Variable) -> Option<SlotId> {
        self.slot_configs.iter().position(|slot_config| slot_config.variable == *variable)
    }

    pub fn is_open(&self, row: usize, col: usize) -> bool {
        self.structure.get(row).and_then(|line| line.get(col)).copied().unwrap_or(false)
    }

    /// The positions `(idx_in_a, idx_in_b)` of the cell shared by two slots, or `None` if they
    /// don't cross.
    pub fn overlap(&self, a: SlotId, b: SlotId) -> Option<(usize, usize)> {
        self.slot_configs[a]
            .crossings
            .iter()
            .enumerate()
            .find_map(|(cell_idx, crossing)| match crossing {
                Some(crossing) if crossing.other_slot_id == b => {
                    Some((cell_idx, crossing.other_slot_cell))
                }
                _ => None,
            })
    }

    /// All slots crossing the given one, in the order of the cells where they cross.
    pub fn neighbors(&self, slot_id: SlotId) -> impl Iterator<Item = SlotId> + '_ {
        self.slot_configs[slot_id]
            .crossings
            .iter()
            .flatten()
            .map(|crossing| crossing.other_slot_id)
    }

    pub fn neighbor_count(&self, slot_id: SlotId) -> usize {
        self.neighbors(slot_id).count()
    }
}

/// A candidate word along with the glyph ids of its characters.
#[derive(Debug, Clone)]
pub struct Word {
    pub string: String,
    pub glyphs: SmallVec<[GlyphId; MAX_SLOT_LENGTH]>,
}

/// The candidate words, sorted and de-duplicated so that word ids are stable for a given set of
/// words regardless of the order they were supplied in.
pub struct WordList {
    pub glyphs: Vec<char>,
    pub words: Vec<Word>,
}

impl Debug for WordList {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WordList")
            .field("glyphs", &self.glyphs)
            .field("words", &format!("({} entries)", self.words.len()))
            .finish()
    }
}

impl WordList {
    pub fn new<I, S>(words: I) -> WordList
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut strings: Vec<String> =
            words.into_iter().map(Into::into).filter(|word| !word.is_empty()).collect();
        strings.sort();
        strings.dedup();

        let mut glyphs: Vec<char> = vec![];
        let mut glyph_ids_by_char: HashMap<char, GlyphId> = HashMap::new();
        let mut word_list: Vec<Word> = Vec::with_capacity(strings.len());

        for string in strings {
            let mut word_glyphs: SmallVec<[GlyphId; MAX_SLOT_LENGTH]> = SmallVec::new();

            for c in string.chars() {
                let glyph_id = match glyph_ids_by_char.get(&c) {
                    Some(&glyph_id) => glyph_id,
                    None => {
                        glyphs.push(c);
                        glyph_ids_by_char.insert(c, glyphs.len() - 1);
                        glyphs.len() - 1
                    }
                };
                word_glyphs.push(glyph_id);
            }

            word_list.push(Word { string, glyphs: word_glyphs });
        }

        WordList { glyphs, words: word_list }
    }

    /// Read a word list with one word per line. Words are trimmed and upper-cased.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<WordList, LoadError> {
        let contents = read_file(path.as_ref())?;
        let word_list = WordList::new(contents.lines().map(|line| line.trim().to_uppercase()));

        if word_list.is_empty() {
            return Err(LoadError::EmptyWordList);
        }

        Ok(word_list)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn word(&self, word_id: WordId) -> &str {
        &self.words[word_id].string
    }

    pub fn id_of(&self, word: &str) -> Option<WordId> {
        self.words.binary_search_by(|candidate| candidate.string.as_str().cmp(word)).ok()
    }
}

/// The words still considered possible for each slot, indexed by slot id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Domains {
    options: Vec<BitSet>,
}

impl Domains {
    /// Every slot starts out with every word.
    fn seeded(slot_count: usize, word_count: usize) -> Domains {
        let all_words: BitSet = (0..word_count).collect();
        Domains { options: vec![all_words; slot_count] }
    }

    pub fn options(&self, slot_id: SlotId) -> &BitSet {
        &self.options[slot_id]
    }

    pub fn option_count(&self, slot_id: SlotId) -> usize {
        self.options[slot_id].len()
    }

    pub fn contains(&self, slot_id: SlotId, word_id: WordId) -> bool {
        self.options[slot_id].contains(word_id)
    }

    pub fn is_exhausted(&self, slot_id: SlotId) -> bool {
        self.options[slot_id].is_empty()
    }

    /// Remove every option of the slot for which `keep` is false. Returns whether anything was
    /// removed.
    fn retain<F>(&mut self, slot_id: SlotId, mut keep: F) -> bool
    where
        F: FnMut(WordId) -> bool,
    {
        let removed: Vec<WordId> =
            self.options[slot_id].iter().filter(|&word_id| !keep(word_id)).collect();

        for &word_id in &removed {
            self.options[slot_id].remove(word_id);
        }

        !removed.is_empty()
    }

    /// Shrink a slot's options down to the single given word.
    fn fix(&mut self, slot_id: SlotId, word_id: WordId) {
        self.options[slot_id].clear();
        self.options[slot_id].insert(word_id);
    }
}

/// A mapping from slots to chosen words. Extending an assignment produces a new value, so
/// sibling branches of the search never see each other's choices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assignment {
    choices: BTreeMap<SlotId, WordId>,
}

impl Assignment {
    pub fn new() -> Assignment {
        Assignment::default()
    }

    pub fn with_choice(&self, slot_id: SlotId, word_id: WordId) -> Assignment {
        let mut assignment = self.clone();
        assignment.choices.insert(slot_id, word_id);
        assignment
    }

    pub fn get(&self, slot_id: SlotId) -> Option<WordId> {
        self.choices.get(&slot_id).copied()
    }

    pub fn is_assigned(&self, slot_id: SlotId) -> bool {
        self.choices.contains_key(&slot_id)
    }

    pub fn len(&self) -> usize {
        self.choices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }

    /// Does this assignment cover every slot of the puzzle?
    pub fn is_complete(&self, puzzle: &Puzzle) -> bool {
        (0..puzzle.slot_count()).all(|slot_id| self.is_assigned(slot_id))
    }

    pub fn iter(&self) -> impl Iterator<Item = (SlotId, WordId)> + '_ {
        self.choices.iter().map(|(&slot_id, &word_id)| (slot_id, word_id))
    }

    pub fn word<'w>(&self, words: &'w WordList, slot_id: SlotId) -> Option<&'w str> {
        self.get(slot_id).map(|word_id| words.word(word_id))
    }

    /// Resolve the assignment into (variable, word) pairs.
    pub fn iter_words<'a>(
        &'a self,
        puzzle: &'a Puzzle,
        words: &'a WordList,
    ) -> impl Iterator<Item = (Variable, &'a str)> + 'a {
        self.iter().map(move |(slot_id, word_id)| (puzzle.variable(slot_id), words.word(word_id)))
    }
}

/// Check a partial or complete assignment: no word may be used twice, every word must fit its
/// slot's length, and crossing slots must agree on their shared letter.
pub fn consistent(puzzle: &Puzzle, words: &WordList, assignment: &Assignment) -> bool {
    let mut used_words = BitSet::with_capacity(words.len());

    for (slot_id, word_id) in assignment.iter() {
        if !used_words.insert(word_id) {
            return false;
        }

        let slot_config = &puzzle.slot_configs[slot_id];
        let word = &words.words[word_id];

        if word.glyphs.len() != slot_config.variable.length {
            return false;
        }

        for (cell_idx, crossing) in slot_config.crossings.iter().enumerate() {
            let Some(crossing) = crossing else { continue };

            if let Some(other_word_id) = assignment.get(crossing.other_slot_id) {
                let other_word = &words.words[other_word_id];

                if other_word.glyphs.get(crossing.other_slot_cell) != Some(&word.glyphs[cell_idx]) {
                    return false;
                }
            }
        }
    }

    true
}

/// A slot's options were all eliminated during propagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no options remain for slot {slot_id}")]
pub struct DomainExhausted {
    pub slot_id: SlotId,
}

/// Which arcs to seed propagation with after each trial assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArcScope {
    /// Every ordered pair of crossing slots.
    #[default]
    Global,
    /// Only the arcs pointing at the slot that was just assigned.
    Neighbors,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SolverOptions {
    /// Reduce the trial slot's options to the trial word before propagating.
    pub fix_trial_word: bool,
    pub arc_scope: ArcScope,
}

/// A struct tracking statistics about the filling process.
#[derive(Debug, Clone, Default)]
pub struct Statistics {
    pub states: u64,
    pub backtracks: u64,
    pub revisions: u64,
    pub duration: Duration,
}

/// A struct representing the results of a fill operation.
#[derive(Debug)]
pub struct FillSuccess {
    pub statistics: Statistics,
    pub assignment: Assignment,
}

#[derive(Debug, Error)]
#[error("no fill exists for this grid")]
pub struct FillFailure {
    pub statistics: Statistics,
}

/// Worklist of arcs `(x, y)` awaiting revision. Arcs come out in FIFO order and an arc that is
/// already queued isn't queued again.
#[derive(Debug)]
struct ArcQueue {
    queue: VecDeque<(SlotId, SlotId)>,
    queued: BitSet,
    slot_count: usize,
}

impl ArcQueue {
    fn new(slot_count: usize) -> ArcQueue {
        ArcQueue {
            queue: VecDeque::new(),
            queued: BitSet::with_capacity(slot_count * slot_count),
            slot_count,
        }
    }

    fn enqueue(&mut self, x: SlotId, y: SlotId) {
        if self.queued.insert(x * self.slot_count + y) {
            self.queue.push_back((x, y));
        }
    }

    fn pop_front(&mut self) -> Option<(SlotId, SlotId)> {
        let (x, y) = self.queue.pop_front()?;
        self.queued.remove(x * self.slot_count + y);
        Some((x, y))
    }
}

/// The live state of a fill: the puzzle and word list being filled plus each slot's remaining
/// options.
pub struct Solver<'a> {
    puzzle: &'a Puzzle,
    words: &'a WordList,
    options: SolverOptions,
    domains: Domains,
    statistics: Statistics,
}

impl<'a> Solver<'a> {
    pub fn new(puzzle: &'a Puzzle, words: &'a WordList) -> Solver<'a> {
        Solver::with_options(puzzle, words, SolverOptions::default())
    }

    pub fn with_options(
        puzzle: &'a Puzzle,
        words: &'a WordList,
        options: SolverOptions,
    ) -> Solver<'a> {
        Solver {
            puzzle,
            words,
            options,
            domains: Domains::seeded(puzzle.slot_count(), words.len()),
            statistics: Statistics::default(),
        }
    }

    pub fn domains(&self) -> &Domains {
        &self.domains
    }

    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    /// Remove every option whose length differs from its slot's length.
    pub fn enforce_node_consistency(&mut self) {
        let puzzle = self.puzzle;
        let words = self.words;

        for slot_config in &puzzle.slot_configs {
            let length = slot_config.variable.length;
            self.domains
                .retain(slot_config.id, |word_id| words.words[word_id].glyphs.len() == length);
        }
    }

    /// Make `x` arc-consistent with `y`: drop every option of `x` whose letter at the crossing
    /// doesn't appear at the crossing in any option of `y`. Returns whether `x` changed.
    pub fn revise(&mut self, x: SlotId, y: SlotId) -> bool {
        let Some((x_cell, y_cell)) = self.puzzle.overlap(x, y) else {
            return false;
        };
        let words = self.words;

        let mut possible_glyphs = BitSet::with_capacity(words.glyphs.len());
        for word_id in self.domains.options(y) {
            if let Some(&glyph) = words.words[word_id].glyphs.get(y_cell) {
                possible_glyphs.insert(glyph);
            }
        }

        let revised = self.domains.retain(x, |word_id| {
            words.words[word_id]
                .glyphs
                .get(x_cell)
                .map_or(false, |&glyph| possible_glyphs.contains(glyph))
        });

        if revised {
            self.statistics.revisions += 1;
        }
        revised
    }

    /// Run AC-3 starting from every arc in the puzzle.
    pub fn ac3(&mut self) -> Result<(), DomainExhausted> {
        let puzzle = self.puzzle;
        let arcs: Vec<(SlotId, SlotId)> = (0..puzzle.slot_count())
            .flat_map(move |x| puzzle.neighbors(x).map(move |y| (x, y)))
            .collect();

        self.ac3_with_arcs(arcs)
    }

    /// Run AC-3 starting from the given arcs. On failure the domains are left in whatever reduced
    /// state propagation reached; it's up to the caller to restore them.
    pub fn ac3_with_arcs<I>(&mut self, arcs: I) -> Result<(), DomainExhausted>
    where
        I: IntoIterator<Item = (SlotId, SlotId)>,
    {
        let puzzle = self.puzzle;
        let mut queue = ArcQueue::new(puzzle.slot_count());
        for (x, y) in arcs {
            queue.enqueue(x, y);
        }

        while let Some((x, y)) = queue.pop_front() {
            let revised = self.revise(x, y);

            if self.domains.is_exhausted(x) {
                return Err(DomainExhausted { slot_id: x });
            }

            // `x` shrank, so any other slot crossing it may have lost support.
            if revised {
                for k in puzzle.neighbors(x).filter(|&k| k != y) {
                    queue.enqueue(k, x);
                }
            }
        }

        Ok(())
    }

    /// Pick the unassigned slot with the fewest remaining options, preferring slots with more
    /// crossings, then lower slot ids.
    pub fn select_unassigned_variable(&self, assignment: &Assignment) -> Option<SlotId> {
        (0..self.puzzle.slot_count())
            .filter(|&slot_id| !assignment.is_assigned(slot_id))
            .min_by_key(|&slot_id| {
                (
                    self.domains.option_count(slot_id),
                    Reverse(self.puzzle.neighbor_count(slot_id)),
                )
            })
    }

    /// Order a slot's options by how many crossing slots also still hold the same word, fewest
    /// first. Ties keep word id order.
    pub fn order_domain_values(&self, slot_id: SlotId) -> Vec<WordId> {
        let mut options: Vec<WordId> = self.domains.options(slot_id).iter().collect();

        options.sort_by_cached_key(|&word_id| {
            self.puzzle
                .neighbors(slot_id)
                .filter(|&neighbor| self.domains.contains(neighbor, word_id))
                .count()
        });

        options
    }

    fn propagate_choice(
        &mut self,
        slot_id: SlotId,
        word_id: WordId,
    ) -> Result<(), DomainExhausted> {
        if self.options.fix_trial_word {
            self.domains.fix(slot_id, word_id);
        }

        match self.options.arc_scope {
            ArcScope::Global => self.ac3(),
            ArcScope::Neighbors => {
                let arcs: Vec<(SlotId, SlotId)> =
                    self.puzzle.neighbors(slot_id).map(|k| (k, slot_id)).collect();
                self.ac3_with_arcs(arcs)
            }
        }
    }

    /// Extend `assignment` to a complete one, or return `None` if no extension exists. Every
    /// failed option is rolled back, so when `None` is returned the domains are as they were on
    /// entry.
    fn backtrack(&mut self, assignment: Assignment) -> Option<Assignment> {
        if assignment.is_complete(self.puzzle) {
            return Some(assignment);
        }

        self.statistics.states += 1;

        let slot_id = self.select_unassigned_variable(&assignment)?;
        let trial_order = self.order_domain_values(slot_id);

        trace!(
            "state {}: slot {} ({:?}) with {} options at depth {}",
            self.statistics.states,
            slot_id,
            self.puzzle.variable(slot_id),
            trial_order.len(),
            assignment.len(),
        );

        for word_id in trial_order {
            let trial_assignment = assignment.with_choice(slot_id, word_id);

            if !consistent(self.puzzle, self.words, &trial_assignment) {
                continue;
            }

            let snapshot = self.domains.clone();

            let propagated = self.propagate_choice(slot_id, word_id);
            if let Err(DomainExhausted { slot_id: exhausted }) = propagated {
                trace!(
                    "{:?} in slot {} exhausts slot {}",
                    self.words.word(word_id),
                    slot_id,
                    exhausted,
                );
                self.domains = snapshot;
                self.statistics.backtracks += 1;
                continue;
            }

            if let Some(complete) = self.backtrack(trial_assignment) {
                return Some(complete);
            }

            self.domains = snapshot;
            self.statistics.backtracks += 1;
        }

        None
    }

    /// Enforce node and arc consistency, then search for a complete assignment.
    pub fn find_fill(mut self) -> Result<FillSuccess, FillFailure> {
        let start = Instant::now();

        debug!(
            "filling {} slots from {} words",
            self.puzzle.slot_count(),
            self.words.len(),
        );

        self.enforce_node_consistency();
        debug!(
            "node consistency left {} options",
            (0..self.puzzle.slot_count())
                .map(|slot_id| self.domains.option_count(slot_id))
                .sum::<usize>(),
        );

        let result = match self.ac3() {
            Ok(()) => {
                debug!("initial arc consistency made {} revisions", self.statistics.revisions);
                self.backtrack(Assignment::new())
            }
            Err(DomainExhausted { slot_id }) => {
                debug!("initial arc consistency exhausted slot {}", slot_id);
                None
            }
        };

        self.statistics.duration = start.elapsed();

        match result {
            Some(assignment) => {
                info!("found a fill: {:?}", self.statistics);
                Ok(FillSuccess { statistics: self.statistics, assignment })
            }
            None => {
                info!("no fill exists: {:?}", self.statistics);
                Err(FillFailure { statistics: self.statistics })
            }
        }
    }
}

/// Fill the puzzle from the word list with default options, returning the first complete
/// assignment found.
pub fn solve(puzzle: &Puzzle, words: &WordList) -> Option<Assignment> {
    Solver::new(puzzle, words).find_fill().ok().map(|success| success.assignment)
}

/// Return a matrix of the letters placed by an assignment, `None` wherever nothing is placed.
pub fn letter_grid(
    puzzle: &Puzzle,
    words: &WordList,
    assignment: &Assignment,
) -> Vec<Vec<Option<char>>> {
    let mut letters = vec![vec![None; puzzle.width]; puzzle.height];

    for (slot_id, word_id) in assignment.iter() {
        let cells = puzzle.variable(slot_id).cell_coords();

        for ((row, col), &glyph) in cells.zip(&words.words[word_id].glyphs) {
            letters[row][col] = Some(words.glyphs[glyph]);
        }
    }

    letters
}

/// Turn the given puzzle and assignment into a rendered string.
pub fn render_grid(puzzle: &Puzzle, words: &WordList, assignment: &Assignment) -> String {
    letter_grid(puzzle, words, assignment)
        .iter()
        .enumerate()
        .map(|(row, line)| {
            line.iter()
                .enumerate()
                .map(|(col, letter)| {
                    if puzzle.is_open(row, col) {
                        letter.unwrap_or(' ')
                    } else {
                        BLOCK_GLYPH
                    }
                })
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Read a TrueType or OpenType font for `render_image`.
pub fn load_font<P: AsRef<Path>>(path: P) -> Result<FontVec, LoadError> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    FontVec::try_from_vec(bytes).map_err(|_| LoadError::InvalidFont { path: path.to_path_buf() })
}

/// Draw the grid on a black canvas, one white square per open cell, with each placed letter
/// centred in its cell. Without a font only the cells are drawn.
pub fn render_image(
    puzzle: &Puzzle,
    words: &WordList,
    assignment: &Assignment,
    font: Option<&FontVec>,
) -> RgbaImage {
    let interior_size = CELL_SIZE - 2 * CELL_BORDER;
    let scale = PxScale::from(LETTER_SCALE);

    let mut img = RgbaImage::from_pixel(
        puzzle.width as u32 * CELL_SIZE,
        puzzle.height as u32 * CELL_SIZE,
        BLACK,
    );

    for (row, line) in letter_grid(puzzle, words, assignment).iter().enumerate() {
        for (col, letter) in line.iter().enumerate() {
            if !puzzle.is_open(row, col) {
                continue;
            }

            let x = (col as u32 * CELL_SIZE + CELL_BORDER) as i32;
            let y = (row as u32 * CELL_SIZE + CELL_BORDER) as i32;
            let cell = Rect::at(x, y).of_size(interior_size, interior_size);
            draw_filled_rect_mut(&mut img, cell, WHITE);

            if let (Some(letter), Some(font)) = (letter, font) {
                let text = letter.to_string();
                let (w, h) = text_size(scale, font, &text);

                // Nudged up to sit visually centred above the baseline.
                draw_text_mut(
                    &mut img,
                    BLACK,
                    x + (interior_size as i32 - w as i32) / 2,
                    y + (interior_size as i32 - h as i32) / 2 - 10,
                    scale,
                    font,
                    &text,
                );
            }
        }
    }

    img
}

/// Render the grid with `render_image` and write it to `path`; the format follows the extension.
pub fn save_image<P: AsRef<Path>>(
    puzzle: &Puzzle,
    words: &WordList,
    assignment: &Assignment,
    font: Option<&FontVec>,
    path: P,
) -> ImageResult<()> {
    render_image(puzzle, words, assignment, font).save(path)
}
