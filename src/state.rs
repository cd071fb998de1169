//! Shared game state: grid, slot table, version, the single value every
//! worker thread and the tick thread hold a handle to.
//!
//! The reference keeps this in a `System-V` shared segment guarded by a
//! `PTHREAD_PROCESS_SHARED` mutex. Collapsing the topology to a single
//! process with a thread-per-worker and an in-process lock leaves the
//! external behavior unchanged, so this is an `Arc<Mutex<Inner>>`, mirroring
//! the teacher's `Arc<Mutex<Game>>` pattern.

use std::sync::{Arc, Mutex, MutexGuard};

use rand::Rng;

use crate::config::{Config, MAX_PLACEMENT_ATTEMPTS, MAX_PLAYERS, MAX_SNAKE_LENGTH};

/// A grid cell. `EMPTY`, `WALL`, `FOOD`, or `PLAYER_BASE + slot_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell(pub i32);

impl Cell {
    pub const EMPTY: Cell = Cell(0);
    pub const WALL: Cell = Cell(1);
    pub const FOOD: Cell = Cell(2);
    pub const PLAYER_BASE: i32 = 10;

    pub fn for_slot(slot_id: usize) -> Cell {
        Cell(Self::PLAYER_BASE + slot_id as i32)
    }

    pub fn occupant_slot(self) -> Option<usize> {
        if self.0 >= Self::PLAYER_BASE {
            Some((self.0 - Self::PLAYER_BASE) as usize)
        } else {
            None
        }
    }

    pub fn is_empty(self) -> bool {
        self == Cell::EMPTY
    }

    pub fn is_wall(self) -> bool {
        self == Cell::WALL
    }

    pub fn is_food(self) -> bool {
        self == Cell::FOOD
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

/// Movement direction, wire-encoded as `'W'`/`'A'`/`'S'`/`'D'`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub fn from_wire_byte(b: u8) -> Option<Direction> {
        match b {
            b'W' => Some(Direction::Up),
            b'S' => Some(Direction::Down),
            b'A' => Some(Direction::Left),
            b'D' => Some(Direction::Right),
            _ => None,
        }
    }

    pub fn to_wire_byte(self) -> u8 {
        match self {
            Direction::Up => b'W',
            Direction::Down => b'S',
            Direction::Left => b'A',
            Direction::Right => b'D',
        }
    }

    fn delta(self) -> (i32, i32) {
        match self {
            Direction::Up => (0, -1),
            Direction::Down => (0, 1),
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
        }
    }

    /// True if `self` is the 180-degree reversal of `other`.
    pub fn is_opposite(self, other: Direction) -> bool {
        matches!(
            (self, other),
            (Direction::Up, Direction::Down)
                | (Direction::Down, Direction::Up)
                | (Direction::Left, Direction::Right)
                | (Direction::Right, Direction::Left)
        )
    }
}

/// One snake record: body (head at index 0), length, current direction,
/// alive flag.
#[derive(Debug, Clone)]
pub struct Snake {
    pub body: Vec<Point>,
    pub length: usize,
    pub direction: Direction,
    pub alive: bool,
}

impl Snake {
    fn spawn_at(origin: Point) -> Self {
        Snake {
            body: vec![origin],
            length: 1,
            direction: Direction::Right,
            alive: true,
        }
    }

    pub fn head(&self) -> Point {
        self.body[0]
    }
}

/// One player-table slot: active flag, score, snake record.
#[derive(Debug, Clone)]
pub struct Slot {
    pub active: bool,
    pub score: u32,
    pub snake: Snake,
}

impl Slot {
    fn empty() -> Self {
        Slot {
            active: false,
            score: 0,
            snake: Snake {
                body: Vec::new(),
                length: 0,
                direction: Direction::Right,
                alive: false,
            },
        }
    }
}

/// The mutex-protected interior: grid, slot table, version counter.
pub struct Inner {
    pub width: usize,
    pub height: usize,
    pub grid: Vec<Cell>,
    pub slots: Vec<Slot>,
    pub version: u64,
}

impl Inner {
    fn new(width: usize, height: usize) -> Self {
        let mut grid = vec![Cell::EMPTY; width * height];
        for y in 0..height {
            for x in 0..width {
                if x == 0 || x == width - 1 || y == 0 || y == height - 1 {
                    grid[y * width + x] = Cell::WALL;
                }
            }
        }

        let mut inner = Inner {
            width,
            height,
            grid,
            slots: (0..MAX_PLAYERS).map(|_| Slot::empty()).collect(),
            version: 0,
        };

        let mut rng = rand::thread_rng();
        for _ in 0..crate::config::INITIAL_FOOD_COUNT {
            if let Some(p) = inner.random_interior_empty(&mut rng) {
                inner.set_cell(p, Cell::FOOD);
            }
        }

        inner
    }

    fn idx(&self, p: Point) -> usize {
        p.y as usize * self.width + p.x as usize
    }

    pub fn cell(&self, p: Point) -> Cell {
        self.grid[self.idx(p)]
    }

    fn set_cell(&mut self, p: Point, c: Cell) {
        let i = self.idx(p);
        self.grid[i] = c;
    }

    fn is_interior(&self, p: Point) -> bool {
        p.x > 0 && p.y > 0 && (p.x as usize) < self.width - 1 && (p.y as usize) < self.height - 1
    }

    /// Picks a random interior EMPTY cell. Bounded-retry, with a
    /// deterministic full-scan fallback in place of the reference's
    /// unbounded retry loop.
    fn random_interior_empty(&self, rng: &mut impl Rng) -> Option<Point> {
        for _ in 0..MAX_PLACEMENT_ATTEMPTS {
            let x = rng.gen_range(1..self.width as i32 - 1);
            let y = rng.gen_range(1..self.height as i32 - 1);
            let p = Point { x, y };
            if self.cell(p).is_empty() {
                return Some(p);
            }
        }

        for y in 1..self.height - 1 {
            for x in 1..self.width - 1 {
                let p = Point {
                    x: x as i32,
                    y: y as i32,
                };
                if self.cell(p).is_empty() {
                    return Some(p);
                }
            }
        }

        None
    }

    fn clear_slot_cells(&mut self, slot_id: usize) {
        let token = Cell::for_slot(slot_id);
        for c in self.grid.iter_mut() {
            if *c == token {
                *c = Cell::EMPTY;
            }
        }
    }

    /// Allocates a free slot, places a length-1 snake at a random interior
    /// EMPTY cell, and marks it active.
    fn try_admit(&mut self) -> Option<usize> {
        let slot_id = (0..self.slots.len()).find(|&i| !self.slots[i].active)?;

        let mut rng = rand::thread_rng();
        let origin = self.random_interior_empty(&mut rng)?;

        self.slots[slot_id] = Slot {
            active: true,
            score: 0,
            snake: Snake::spawn_at(origin),
        };
        self.set_cell(origin, Cell::for_slot(slot_id));
        Some(slot_id)
    }

    /// Refuses the 180-degree reversal; no-op on an inactive/dead slot.
    fn apply_move(&mut self, slot_id: usize, dir: Direction) {
        let Some(slot) = self.slots.get_mut(slot_id) else {
            return;
        };
        if !slot.active || !slot.snake.alive {
            return;
        }
        if dir.is_opposite(slot.snake.direction) {
            return;
        }
        slot.snake.direction = dir;
    }

    /// Marks inactive and clears any occupancy cells for this slot.
    fn release(&mut self, slot_id: usize) {
        if slot_id >= self.slots.len() {
            return;
        }
        self.slots[slot_id].active = false;
        self.slots[slot_id].snake.alive = false;
        self.clear_slot_cells(slot_id);
    }

    /// One simulation tick: ascending slot order, collision classification
    /// before any write, then either death or a move/eat step, then a
    /// single version bump at the end.
    fn advance_tick(&mut self) {
        for slot_id in 0..self.slots.len() {
            if !self.slots[slot_id].active || !self.slots[slot_id].snake.alive {
                continue;
            }

            let head = self.slots[slot_id].snake.head();
            let (dx, dy) = self.slots[slot_id].snake.direction.delta();
            let new_head = Point {
                x: head.x + dx,
                y: head.y + dy,
            };

            let dest = self.cell(new_head);
            let collision = dest.is_wall() || dest.occupant_slot().is_some();

            if collision {
                self.slots[slot_id].snake.alive = false;
                self.slots[slot_id].active = false;
                self.clear_slot_cells(slot_id);
                continue;
            }

            let eating = dest.is_food();
            if eating {
                self.slots[slot_id].score += 1;
                let mut rng = rand::thread_rng();
                if let Some(p) = self.random_interior_empty(&mut rng) {
                    self.set_cell(p, Cell::FOOD);
                }
            }

            // Eating only grows the body while under the length cap; once
            // capped, further food keeps scoring but the tail still steps
            // forward, so body length and stamped-cell count stay bounded.
            let grows = eating && self.slots[slot_id].snake.length < MAX_SNAKE_LENGTH;
            if !grows {
                let tail = *self.slots[slot_id].snake.body.last().unwrap();
                self.set_cell(tail, Cell::EMPTY);
                self.slots[slot_id].snake.body.pop();
            } else {
                self.slots[slot_id].snake.length += 1;
            }
            self.slots[slot_id].snake.body.insert(0, new_head);

            self.set_cell(new_head, Cell::for_slot(slot_id));
        }

        self.version += 1;
    }
}

/// Cross-thread handle to the shared game state. Cloning is cheap (an `Arc`
/// bump); every clone locks the same underlying `Mutex`.
#[derive(Clone)]
pub struct SharedState {
    inner: Arc<Mutex<Inner>>,
}

impl SharedState {
    pub fn new(config: &Config) -> Self {
        SharedState {
            inner: Arc::new(Mutex::new(Inner::new(config.map_width, config.map_height))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot_grid(&self) -> Vec<Cell> {
        self.lock().grid.clone()
    }

    pub fn read_version(&self) -> u64 {
        self.lock().version
    }

    pub fn try_admit(&self) -> Option<usize> {
        self.lock().try_admit()
    }

    pub fn apply_move(&self, slot_id: usize, dir: Direction) {
        self.lock().apply_move(slot_id, dir);
    }

    pub fn release(&self, slot_id: usize) {
        self.lock().release(slot_id);
    }

    pub fn advance_tick(&self) {
        self.lock().advance_tick();
    }

    pub fn is_slot_active(&self, slot_id: usize) -> bool {
        self.lock().slots.get(slot_id).map(|s| s.active).unwrap_or(false)
    }

    pub fn dimensions(&self) -> (usize, usize) {
        let inner = self.lock();
        (inner.width, inner.height)
    }
}

#[cfg(test)]
pub(crate) fn validate_invariants(inner: &Inner) -> Result<(), String> {
    for x in 0..inner.width {
        for y in [0, inner.height - 1] {
            if !inner.cell(Point { x: x as i32, y: y as i32 }).is_wall() {
                return Err(format!("border cell ({x},{y}) is not WALL"));
            }
        }
    }
    for y in 0..inner.height {
        for x in [0, inner.width - 1] {
            if !inner.cell(Point { x: x as i32, y: y as i32 }).is_wall() {
                return Err(format!("border cell ({x},{y}) is not WALL"));
            }
        }
    }

    for (slot_id, slot) in inner.slots.iter().enumerate() {
        if slot.active && slot.snake.alive {
            for p in &slot.snake.body {
                if !inner.is_interior(*p) {
                    return Err(format!("slot {slot_id} body point {p:?} not interior"));
                }
                if inner.cell(*p) != Cell::for_slot(slot_id) {
                    return Err(format!("slot {slot_id} body point {p:?} not stamped"));
                }
            }
            if slot.snake.body[0] != slot.snake.head() {
                return Err(format!("slot {slot_id} head mismatch"));
            }
        } else {
            let token = Cell::for_slot(slot_id);
            if inner.grid.iter().any(|&c| c == token) {
                return Err(format!("inactive slot {slot_id} still stamped on grid"));
            }
        }
    }

    Ok(())
}
