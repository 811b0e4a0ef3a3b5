//! Card value types shared by every layer of the engine.
//!
//! # Face modes
//!
//! A card may carry a back image, either because it is a transforming
//! double-faced card or because it melds into a separate result card. The
//! requested [`FaceMode`] decides which faces are printed. A mode asking for a
//! back face on a printing without one degrades to [`FaceMode::FrontOnly`].
//!
//! [`expand_image_urls`] turns a printing, a quantity and a face mode into the
//! ordered list of image URLs to print. Preview and document generation both
//! go through it so the two can never disagree.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which faces of a card to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FaceMode {
    /// Front face only.
    FrontOnly,
    /// Back face only.
    BackOnly,
    /// Front then back, as separate images.
    #[default]
    BothSides,
}

impl FaceMode {
    /// Numeric value used at the C boundary.
    pub fn as_i32(self) -> i32 {
        match self {
            FaceMode::FrontOnly => 0,
            FaceMode::BackOnly => 1,
            FaceMode::BothSides => 2,
        }
    }

    /// Decode the C value. Anything outside `0..=2` is `None`.
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(FaceMode::FrontOnly),
            1 => Some(FaceMode::BackOnly),
            2 => Some(FaceMode::BothSides),
            _ => None,
        }
    }

    /// The mode actually applied to a printing.
    pub fn effective(self, has_back: bool) -> Self {
        if has_back {
            self
        } else {
            FaceMode::FrontOnly
        }
    }
}

impl fmt::Display for FaceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaceMode::FrontOnly => write!(f, "front"),
            FaceMode::BackOnly => write!(f, "back"),
            FaceMode::BothSides => write!(f, "both"),
        }
    }
}

impl FromStr for FaceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "front" | "front-only" | "frontonly" => Ok(FaceMode::FrontOnly),
            "back" | "back-only" | "backonly" => Ok(FaceMode::BackOnly),
            "both" | "both-sides" | "bothsides" => Ok(FaceMode::BothSides),
            other => Err(format!("unknown face mode '{}'", other)),
        }
    }
}

/// What kind of back a printing has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BackKind {
    /// Single-faced.
    #[default]
    None,
    /// Transforming or modal double-faced card.
    DoubleFaced,
    /// Melds with a partner into a separate result card.
    Meld,
}

impl BackKind {
    /// Numeric value used at the C boundary.
    pub fn as_i32(self) -> i32 {
        match self {
            BackKind::None => 0,
            BackKind::DoubleFaced => 1,
            BackKind::Meld => 2,
        }
    }

    /// Decode the C value, treating unknown values as single-faced.
    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => BackKind::DoubleFaced,
            2 => BackKind::Meld,
            _ => BackKind::None,
        }
    }
}

/// One line of a decklist after tokenizing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecklistEntry {
    /// Number of copies, always at least one.
    pub quantity: u32,
    pub name: String,
    /// Set code hint, lowercase.
    pub set: Option<String>,
    /// Language code hint, lowercase.
    pub language: Option<String>,
    /// Per-entry face mode. `None` defers to the global mode.
    pub face_mode: Option<FaceMode>,
    /// 1-based line in the source text.
    pub source_line: Option<u32>,
}

impl DecklistEntry {
    /// Create an entry with no hints. A zero quantity is raised to one.
    pub fn new(quantity: u32, name: impl Into<String>) -> Self {
        Self {
            quantity: quantity.max(1),
            name: name.into(),
            set: None,
            language: None,
            face_mode: None,
            source_line: None,
        }
    }

    pub fn with_set(mut self, set: impl Into<String>) -> Self {
        self.set = Some(set.into().to_ascii_lowercase());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into().to_ascii_lowercase());
        self
    }

    pub fn with_face_mode(mut self, mode: FaceMode) -> Self {
        self.face_mode = Some(mode);
        self
    }

    pub fn with_source_line(mut self, line: u32) -> Self {
        self.source_line = Some(line);
        self
    }
}

/// One specific printing as reported by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardPrinting {
    pub name: String,
    pub set_code: String,
    pub language: String,
    pub front_image_url: String,
    pub back_image_url: Option<String>,
    pub back_kind: BackKind,
    /// Name of the back face, or of the meld result.
    pub back_name: Option<String>,
}

impl CardPrinting {
    /// A single-faced printing.
    pub fn single(
        name: impl Into<String>,
        set_code: impl Into<String>,
        language: impl Into<String>,
        front_image_url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            set_code: set_code.into(),
            language: language.into(),
            front_image_url: front_image_url.into(),
            back_image_url: None,
            back_kind: BackKind::None,
            back_name: None,
        }
    }

    /// Attach a back face.
    pub fn with_back(
        mut self,
        kind: BackKind,
        back_name: impl Into<String>,
        back_image_url: impl Into<String>,
    ) -> Self {
        self.back_kind = kind;
        self.back_name = Some(back_name.into());
        self.back_image_url = Some(back_image_url.into());
        self
    }

    pub fn has_back(&self) -> bool {
        self.back_image_url.is_some()
    }
}

/// A printing bound to a quantity and face mode.
///
/// Never edited after creation; picking another face mode builds a new value
/// with [`ResolvedCard::with_face_mode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCard {
    pub name: String,
    pub set_code: String,
    pub language: String,
    pub front_url: String,
    pub back_url: Option<String>,
    pub quantity: u32,
    pub face_mode: FaceMode,
    pub back_kind: BackKind,
    pub back_name: Option<String>,
}

impl ResolvedCard {
    /// Bind a printing, degrading the face mode if it has no back.
    pub fn from_printing(printing: &CardPrinting, quantity: u32, face_mode: FaceMode) -> Self {
        Self {
            name: printing.name.clone(),
            set_code: printing.set_code.clone(),
            language: printing.language.clone(),
            front_url: printing.front_image_url.clone(),
            back_url: printing.back_image_url.clone(),
            quantity: quantity.max(1),
            face_mode: face_mode.effective(printing.has_back()),
            back_kind: printing.back_kind,
            back_name: printing.back_name.clone(),
        }
    }

    /// The printing this card was resolved to.
    pub fn printing(&self) -> CardPrinting {
        CardPrinting {
            name: self.name.clone(),
            set_code: self.set_code.clone(),
            language: self.language.clone(),
            front_image_url: self.front_url.clone(),
            back_image_url: self.back_url.clone(),
            back_kind: self.back_kind,
            back_name: self.back_name.clone(),
        }
    }

    /// Same printing and quantity under another face mode.
    pub fn with_face_mode(&self, face_mode: FaceMode) -> Self {
        Self {
            face_mode: face_mode.effective(self.back_url.is_some()),
            ..self.clone()
        }
    }

    /// Every image to print for this card.
    pub fn image_urls(&self) -> Vec<String> {
        expand_image_urls(&self.printing(), self.quantity, self.face_mode)
    }

    /// Distinct image URLs the card depends on, front first.
    pub fn face_urls(&self) -> Vec<&str> {
        let mut urls = vec![self.front_url.as_str()];
        if let Some(back) = &self.back_url {
            if back != &self.front_url {
                urls.push(back.as_str());
            }
        }
        urls
    }
}

/// Expand a printing into the ordered image URLs for `quantity` copies.
///
/// Per copy: `FrontOnly` yields the front, `BackOnly` the back, `BothSides`
/// the front followed by the back. The face mode is degraded first when the
/// printing has no back, so a single-faced card always yields fronts.
pub fn expand_image_urls(printing: &CardPrinting, quantity: u32, face_mode: FaceMode) -> Vec<String> {
    let faces = copy_faces(printing, face_mode);
    (0..quantity)
        .flat_map(|_| faces.iter().map(|url| url.to_string()))
        .collect()
}

/// The images one copy of `printing` prints under `face_mode`, in order.
///
/// [`expand_image_urls`] repeats this list `quantity` times.
pub fn copy_faces(printing: &CardPrinting, face_mode: FaceMode) -> Vec<&str> {
    match (face_mode.effective(printing.has_back()), &printing.back_image_url) {
        (FaceMode::BackOnly, Some(back)) => vec![back.as_str()],
        (FaceMode::BothSides, Some(back)) => vec![printing.front_image_url.as_str(), back.as_str()],
        _ => vec![printing.front_image_url.as_str()],
    }
}
