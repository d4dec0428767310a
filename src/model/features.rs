//! Static features extracted from a student program

use std::fmt;

use serde::Serialize;

/// 1-based inclusive source line range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct LineRange {
    pub start: usize,
    pub end: usize,
}

impl LineRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn single(line: usize) -> Self {
        Self::new(line, line)
    }
}

impl fmt::Display for LineRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "Line {}", self.start)
        } else {
            write!(f, "Lines {}-{}", self.start, self.end)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Sprite,
    Shape,
    Text,
    Background,
}

/// A drawable created on the canvas
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectFeature {
    /// Variable the object was assigned to, if any
    pub identifier: Option<String>,
    pub kind: ObjectKind,
    /// Constructor arguments by parameter name, as source text
    pub properties: Vec<(String, String)>,
    pub lines: LineRange,
}

/// What a property change touched
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeTarget {
    /// `sprite.x = ...`
    Property(String),
    /// `sprite.setAnimation(...)`
    Method(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropertyChange {
    pub object: String,
    pub target: ChangeTarget,
    pub lines: LineRange,
    pub draw_loop: bool,
}

impl PropertyChange {
    pub fn is_method(&self, name: &str) -> bool {
        matches!(&self.target, ChangeTarget::Method(m) if m == name)
    }

    pub fn property_contains(&self, fragment: &str) -> bool {
        matches!(&self.target, ChangeTarget::Property(p) if p.contains(fragment))
    }
}

/// What drives a conditional's test expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Keyboard or mouse input
    User,
    /// A sprite or object property
    Object,
    /// A plain variable
    Variable,
    Untracked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conditional {
    pub trigger: Trigger,
    pub lines: LineRange,
    pub draw_loop: bool,
}

/// Position updates inside the draw loop
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MovementFeatures {
    /// Updates driven by `randomNumber()` or `random()`
    pub random: Vec<LineRange>,
    /// Self-referencing updates such as `x = x + 1`
    pub counter: Vec<LineRange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariableDecl {
    pub name: String,
    pub lines: LineRange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserFunction {
    pub name: String,
    pub lines: LineRange,
    pub calls: usize,
    /// True for the `draw` function itself
    pub draw_loop: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionCall {
    pub function: String,
    pub lines: LineRange,
    pub draw_loop: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ObjectCounts {
    pub shapes: usize,
    pub sprites: usize,
    pub text: usize,
}

impl ObjectCounts {
    pub fn total(&self) -> usize {
        self.shapes + self.sprites + self.text
    }
}

/// Everything the decision trees look at. Immutable once extracted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CodeFeatures {
    pub objects: Vec<ObjectFeature>,
    pub property_changes: Vec<PropertyChange>,
    pub conditionals: Vec<Conditional>,
    pub movement: MovementFeatures,
    pub variables: Vec<VariableDecl>,
    pub user_functions: Vec<UserFunction>,
    pub function_calls: Vec<FunctionCall>,
    /// Statements skipped because they could not be parsed
    pub diagnostics: Vec<String>,
}

impl CodeFeatures {
    pub fn object_counts(&self) -> ObjectCounts {
        let mut counts = ObjectCounts::default();
        for object in &self.objects {
            match object.kind {
                ObjectKind::Shape => counts.shapes += 1,
                ObjectKind::Sprite => counts.sprites += 1,
                ObjectKind::Text => counts.text += 1,
                ObjectKind::Background => {}
            }
        }
        counts
    }

    /// Whether `identifier` names a created sprite
    pub fn is_sprite(&self, identifier: &str) -> bool {
        self.objects
            .iter()
            .any(|o| o.kind == ObjectKind::Sprite && o.identifier.as_deref() == Some(identifier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_range_display() {
        assert_eq!(LineRange::new(1, 2).to_string(), "Lines 1-2");
        assert_eq!(LineRange::single(3).to_string(), "Line 3");
    }

    #[test]
    fn test_object_counts_skip_background() {
        let object = |kind| ObjectFeature {
            identifier: None,
            kind,
            properties: vec![],
            lines: LineRange::single(1),
        };
        let features = CodeFeatures {
            objects: vec![
                object(ObjectKind::Background),
                object(ObjectKind::Sprite),
                object(ObjectKind::Sprite),
                object(ObjectKind::Shape),
                object(ObjectKind::Text),
            ],
            ..Default::default()
        };
        let counts = features.object_counts();
        assert_eq!(counts, ObjectCounts { shapes: 1, sprites: 2, text: 1 });
        assert_eq!(counts.total(), 4);
    }
}
