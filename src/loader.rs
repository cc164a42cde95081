//! Level discovery and parsing.
//!
//! A level directory holds `<n>.lvl` files plus the script files they name.
//! Level files carry `DIM`, `TEMPO`, `PAC` and `MON` directives and map rows;
//! script files carry `PASSO`, `POS` and one command per line.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use crate::actors::{Ghost, Pacman, Script};
use crate::constants::{DEFAULT_TEMPO_MS, LEVEL_EXTENSION, MAX_GHOSTS, MAX_GRID_CELLS, MAX_LEVELS};
use crate::error::{GameError, Result};
use crate::grid::{cell_count, GridLayout, Tile};
use crate::level::LevelData;
use crate::types::{Action, Command, Vec2};

/// Source of levels for a run. Levels are numbered from 1.
pub trait LevelLoader: Send + Sync {
    fn level_count(&self) -> Result<usize>;
    fn load(&self, index: usize) -> Result<LevelData>;
}

/// Parsed `.lvl` file before its script references are resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LevelFile {
    pub layout: GridLayout,
    pub tempo_ms: u64,
    pub pacman_script: Option<String>,
    pub ghost_scripts: Vec<String>,
}

/// Parsed actor script file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScriptFile {
    pub passo: u32,
    pub pos: Vec2,
    pub script: Script,
}

pub fn parse_level_text(index: usize, text: &str) -> Result<LevelFile> {
    let mut layout: Option<GridLayout> = None;
    let mut tempo_ms = DEFAULT_TEMPO_MS;
    let mut pacman_script = None;
    let mut ghost_scripts = Vec::new();
    let mut filled = 0usize;

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let mut tokens = trimmed.split_whitespace();
        match tokens.next() {
            Some("DIM") => {
                let width = next_number::<i32>(&mut tokens);
                let height = next_number::<i32>(&mut tokens);
                match (width, height) {
                    (Some(w), Some(h)) if w > 0 && h > 0 => {
                        if !cell_count(w, h).is_some_and(|cells| cells <= MAX_GRID_CELLS) {
                            return Err(GameError::invalid_level(
                                index,
                                format!("DIM {w}x{h} too large, at most {MAX_GRID_CELLS} cells"),
                            ));
                        }
                        layout = Some(GridLayout::new(w, h));
                        filled = 0;
                    }
                    _ => {
                        return Err(GameError::invalid_level(
                            index,
                            format!("bad DIM line {trimmed:?}"),
                        ))
                    }
                }
            }
            Some("TEMPO") => match next_number::<u64>(&mut tokens) {
                Some(ms) => tempo_ms = ms,
                None => warn!(level = index, line = trimmed, "TEMPO without a value"),
            },
            Some("PAC") => pacman_script = tokens.next().map(str::to_string),
            Some("MON") => {
                for file in tokens {
                    if ghost_scripts.len() == MAX_GHOSTS {
                        warn!(level = index, max = MAX_GHOSTS, "extra ghost scripts ignored");
                        break;
                    }
                    ghost_scripts.push(file.to_string());
                }
            }
            _ => {
                let Some(layout) = layout.as_mut() else {
                    debug!(level = index, line, "map row before DIM skipped");
                    continue;
                };
                for c in line.chars() {
                    if filled >= layout.tiles.len() {
                        break;
                    }
                    let tile = match c {
                        'X' => Tile::wall(),
                        'o' => Tile::dot(),
                        '@' => Tile::portal(),
                        _ => continue,
                    };
                    layout.tiles[filled] = tile;
                    filled += 1;
                }
            }
        }
    }

    let Some(layout) = layout else {
        return Err(GameError::invalid_level(index, "no DIM directive"));
    };
    if filled < layout.tiles.len() {
        debug!(
            level = index,
            filled,
            cells = layout.tiles.len(),
            "map shorter than DIM, rest left empty"
        );
    }
    Ok(LevelFile {
        layout,
        tempo_ms,
        pacman_script,
        ghost_scripts,
    })
}

pub fn parse_script_text(text: &str) -> Result<ScriptFile> {
    let mut passo = 0;
    let mut pos = Vec2::default();
    let mut commands = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let mut tokens = trimmed.split_whitespace();
        let Some(head) = tokens.next() else {
            continue;
        };
        match head {
            "PASSO" => passo = next_number(&mut tokens).unwrap_or(0),
            "POS" => {
                let row = next_number::<i32>(&mut tokens);
                let col = next_number::<i32>(&mut tokens);
                match (row, col) {
                    (Some(row), Some(col)) => pos = Vec2::new(col, row),
                    _ => warn!(line = trimmed, "POS needs a row and a column"),
                }
            }
            _ => {
                let Some(token) = head.chars().next() else {
                    continue;
                };
                let action = Action::from_script(token);
                let command = match action {
                    Action::Wait => Command::wait(next_number(&mut tokens).unwrap_or(1)),
                    Action::Unknown(_) => {
                        warn!(line = trimmed, "unknown script command kept as a no-op");
                        Command::new(action)
                    }
                    _ => Command::new(action),
                };
                commands.push(command);
            }
        }
    }

    Ok(ScriptFile {
        passo,
        pos,
        script: Script::new(commands),
    })
}

/// Resolves a parsed level file against its script sources.
pub fn assemble_level(
    file: LevelFile,
    mut script: impl FnMut(&str) -> Result<ScriptFile>,
) -> Result<LevelData> {
    let pacman = match &file.pacman_script {
        Some(name) => {
            let parsed = script(name)?;
            Pacman::new(parsed.pos, parsed.passo, parsed.script)
        }
        None => Pacman::new(Vec2::default(), 0, Script::default()),
    };
    let mut ghosts = Vec::with_capacity(file.ghost_scripts.len());
    for name in &file.ghost_scripts {
        let parsed = script(name)?;
        ghosts.push(Ghost::new(parsed.pos, parsed.passo, parsed.script));
    }
    Ok(LevelData {
        layout: file.layout,
        tempo: Duration::from_millis(file.tempo_ms),
        pacman,
        ghosts,
    })
}

fn next_number<'a, T: std::str::FromStr>(tokens: &mut impl Iterator<Item = &'a str>) -> Option<T> {
    tokens.next().and_then(|token| token.parse().ok())
}

/// Reads `<n>.lvl` files and their scripts from one directory.
#[derive(Clone, Debug)]
pub struct DirectoryLoader {
    dir: PathBuf,
}

impl DirectoryLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn level_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{index}.{LEVEL_EXTENSION}"))
    }

    fn read(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path).map_err(|err| {
            warn!(path = %path.display(), %err, "cannot read level asset");
            GameError::Io(err)
        })
    }
}

impl LevelLoader for DirectoryLoader {
    fn level_count(&self) -> Result<usize> {
        let mut files = 0usize;
        let mut highest = 0usize;
        for entry in fs::read_dir(&self.dir)? {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let path = Path::new(name);
            if path.extension().and_then(|ext| ext.to_str()) != Some(LEVEL_EXTENSION) {
                continue;
            }
            let Some(index) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<usize>().ok())
            else {
                continue;
            };
            files += 1;
            highest = highest.max(index);
        }

        if highest == 0 {
            return Err(GameError::NoLevels(self.dir.display().to_string()));
        }
        if files != highest {
            warn!(files, highest, dir = %self.dir.display(), "level files are not numbered contiguously");
        }
        if highest > MAX_LEVELS {
            warn!(highest, max = MAX_LEVELS, "only the first levels will be played");
            return Ok(MAX_LEVELS);
        }
        debug!(levels = highest, dir = %self.dir.display(), "levels discovered");
        Ok(highest)
    }

    fn load(&self, index: usize) -> Result<LevelData> {
        let text = self.read(&self.level_path(index))?;
        let file = parse_level_text(index, &text)?;
        assemble_level(file, |name| {
            let text = self.read(&self.dir.join(name))?;
            parse_script_text(&text)
        })
    }
}

#[derive(Clone, Debug)]
enum MemoryLevel {
    Text(String),
    Data(LevelData),
}

/// Levels held in memory, either as level text (scripts looked up by file
/// name) or as ready-built data.
#[derive(Clone, Debug, Default)]
pub struct MemoryLoader {
    levels: BTreeMap<usize, MemoryLevel>,
    scripts: BTreeMap<String, String>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, index: usize, text: impl Into<String>) -> Self {
        self.levels.insert(index, MemoryLevel::Text(text.into()));
        self
    }

    pub fn with_data(mut self, index: usize, data: LevelData) -> Self {
        self.levels.insert(index, MemoryLevel::Data(data));
        self
    }

    pub fn with_script(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.scripts.insert(name.into(), text.into());
        self
    }
}

impl LevelLoader for MemoryLoader {
    fn level_count(&self) -> Result<usize> {
        match self.levels.keys().next_back() {
            Some(highest) if *highest > 0 => Ok((*highest).min(MAX_LEVELS)),
            _ => Err(GameError::NoLevels("memory".to_string())),
        }
    }

    fn load(&self, index: usize) -> Result<LevelData> {
        let text = match self.levels.get(&index) {
            Some(MemoryLevel::Text(text)) => text,
            Some(MemoryLevel::Data(data)) => return Ok(data.clone()),
            None => return Err(GameError::invalid_level(index, "no such level")),
        };
        let file = parse_level_text(index, text)?;
        assemble_level(file, |name| match self.scripts.get(name) {
            Some(text) => parse_script_text(text),
            None => Err(GameError::invalid_level(
                index,
                format!("missing script {name}"),
            )),
        })
    }
}
