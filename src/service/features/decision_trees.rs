//! Rule-based labels for criteria that can be judged from code features alone
//!
//! Each tree is registered for a (criterion, lesson) pair and evaluates its
//! tiers from Extensive down, stopping at the first rule that holds.

use std::collections::HashSet;
use std::fmt;

use crate::model::EvidenceLabel;
use crate::model::features::{
    ChangeTarget, CodeFeatures, LineRange, ObjectKind, PropertyChange, Trigger,
};

pub const POSITION_ELEMENTS: &str = "Position - Elements and the Coordinate System";
pub const MODULARITY_SPRITE_PROPERTIES: &str = "Modularity - Sprites and Sprite Properties";
pub const POSITION_AND_MOVEMENT: &str = "Position and Movement";
pub const CONDITIONALS: &str = "Algorithms and Control - Conditionals";
pub const MODULARITY_MULTIPLE_SPRITES: &str = "Modularity - Multiple Sprites";
pub const MODULARITY_FUNCTIONS: &str = "Modularity - Use of Functions";

/// Outcome of a decision tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeAssessment {
    pub label: EvidenceLabel,
    /// Description of the rule that fired
    pub rule: &'static str,
    /// `Line N: ...` strings pointing at the code that supports the label
    pub evidence: Vec<String>,
}

type Tree = fn(&CodeFeatures) -> TreeAssessment;

const TREES: &[(&str, &str, Tree)] = &[
    (POSITION_ELEMENTS, "csd3-2023-L11", u3l11_position),
    (MODULARITY_SPRITE_PROPERTIES, "csd3-2023-L14", u3l14_modularity),
    (POSITION_AND_MOVEMENT, "csd3-2023-L14", u3l14_position),
    (CONDITIONALS, "csd3-2023-L18", u3l18_conditionals),
    (MODULARITY_MULTIPLE_SPRITES, "csd3-2023-L18", u3l18_modularity),
    (POSITION_AND_MOVEMENT, "csd3-2023-L18", u3l18_position),
    (MODULARITY_MULTIPLE_SPRITES, "csd3-2023-L21", u3l21_modularity),
    (MODULARITY_MULTIPLE_SPRITES, "csd3-2023-L24", u3l24_modularity),
    (MODULARITY_FUNCTIONS, "csd3-2023-L28", u3l28_functions),
];

fn find_tree(criterion: &str, lesson: Option<&str>) -> Option<Tree> {
    TREES
        .iter()
        .find(|(c, l, _)| *c == criterion && lesson.is_none_or(|lesson| lesson == *l))
        .map(|(_, _, tree)| *tree)
}

/// Whether a decision tree exists for the criterion. Without a lesson any
/// lesson's tree matches.
pub fn has_tree(criterion: &str, lesson: Option<&str>) -> bool {
    find_tree(criterion, lesson).is_some()
}

/// Label a criterion from code features. Without a lesson the first tree
/// registered for the criterion is used.
pub fn assess(
    features: &CodeFeatures,
    criterion: &str,
    lesson: Option<&str>,
) -> Option<TreeAssessment> {
    let tree = find_tree(criterion, lesson)?;
    let assessment = tree(features);
    tracing::debug!(
        criterion = %criterion,
        lesson = ?lesson,
        label = %assessment.label,
        evidence = assessment.evidence.len(),
        "Decision tree assessed criterion"
    );
    Some(assessment)
}

/// Deduplicated evidence in insertion order
#[derive(Debug, Default)]
struct Evidence(Vec<String>);

impl Evidence {
    fn add(&mut self, lines: LineRange, message: impl fmt::Display) {
        let entry = format!("{lines}: {message}");
        if !self.0.contains(&entry) {
            self.0.push(entry);
        }
    }

    fn object_types(&mut self, features: &CodeFeatures) {
        let counts = features.object_counts();
        for object in &features.objects {
            match object.kind {
                ObjectKind::Shape => self.add(
                    object.lines,
                    format!("Code contains {} shape{}", counts.shapes, plural(counts.shapes)),
                ),
                ObjectKind::Sprite => self.add(
                    object.lines,
                    format!("Code contains {} sprite{}", counts.sprites, plural(counts.sprites)),
                ),
                ObjectKind::Text => self.add(
                    object.lines,
                    format!(
                        "Code contains {} line{} of text",
                        counts.text,
                        plural(counts.text)
                    ),
                ),
                ObjectKind::Background => {}
            }
        }
    }

    fn total_objects(&mut self, features: &CodeFeatures) {
        let total = features.object_counts().total();
        for object in &features.objects {
            self.add(
                object.lines,
                format!("Code contains {total} total element{}", plural(total)),
            );
        }
    }

    fn sprites_and_other_elements(&mut self, features: &CodeFeatures) {
        let counts = features.object_counts();
        let other = counts.shapes + counts.text;
        for object in &features.objects {
            if object.kind == ObjectKind::Sprite {
                self.add(
                    object.lines,
                    format!("Code contains {} sprite{}", counts.sprites, plural(counts.sprites)),
                );
            } else {
                self.add(
                    object.lines,
                    format!("Code contains {other} non-sprite element{}", plural(other)),
                );
            }
        }
    }

    fn sprites(&mut self, features: &CodeFeatures) {
        let sprites = features.object_counts().sprites;
        for object in features.objects.iter().filter(|o| o.kind == ObjectKind::Sprite) {
            self.add(
                object.lines,
                format!("Code contains {sprites} sprite{}", plural(sprites)),
            );
        }
    }

    fn movement(&mut self, features: &CodeFeatures) {
        let random = features.movement.random.len();
        let counter = features.movement.counter.len();
        for lines in &features.movement.random {
            self.add(
                *lines,
                format!(
                    "Code contains {random} instance{} of movement using the randomNumber() function",
                    plural(random)
                ),
            );
        }
        for lines in &features.movement.counter {
            self.add(
                *lines,
                format!(
                    "Code contains {counter} instance{} of movement using the counter pattern",
                    plural(counter)
                ),
            );
        }
    }

    fn property_changes(&mut self, features: &CodeFeatures) {
        for change in &features.property_changes {
            let place = if change.draw_loop { "in" } else { "outside of" };
            let message = match &change.target {
                ChangeTarget::Property(property) => format!(
                    "{} object's {property} property updated {place} the draw loop",
                    change.object
                ),
                ChangeTarget::Method(method) => format!(
                    "{} object updated by its {method} method {place} the draw loop",
                    change.object
                ),
            };
            self.add(change.lines, message);
        }
    }

    fn animations(&mut self, features: &CodeFeatures) {
        for change in sprite_changes(features, false).filter(|c| c.is_method("setAnimation")) {
            self.add(
                change.lines,
                format!("{} sprite's animation is properly set", change.object),
            );
        }
    }

    fn velocities(&mut self, features: &CodeFeatures) {
        for change in sprite_changes(features, false).filter(|c| c.property_contains("velocity")) {
            self.add(
                change.lines,
                format!(
                    "{} object's velocity updated outside of the draw loop",
                    change.object
                ),
            );
        }
    }

    fn conditionals(&mut self, features: &CodeFeatures, trigger: Trigger, message: &str) {
        for conditional in features
            .conditionals
            .iter()
            .filter(|c| c.draw_loop && c.trigger == trigger)
        {
            self.add(conditional.lines, message);
        }
    }

    fn done(self, label: EvidenceLabel, rule: &'static str) -> TreeAssessment {
        TreeAssessment {
            label,
            rule,
            evidence: self.0,
        }
    }
}

fn plural(count: usize) -> &'static str {
    if count > 1 { "s" } else { "" }
}

/// Changes made to sprites, inside or outside the draw loop
fn sprite_changes(
    features: &CodeFeatures,
    draw_loop: bool,
) -> impl Iterator<Item = &PropertyChange> {
    features
        .property_changes
        .iter()
        .filter(move |c| c.draw_loop == draw_loop && features.is_sprite(&c.object))
}

fn distinct_objects<'a>(changes: impl Iterator<Item = &'a PropertyChange>) -> usize {
    changes.map(|c| c.object.as_str()).collect::<HashSet<_>>().len()
}

fn u3l11_position(features: &CodeFeatures) -> TreeAssessment {
    let counts = features.object_counts();
    let mut evidence = Evidence::default();

    let (label, rule) = if counts.shapes >= 2 && counts.sprites >= 2 && counts.text >= 2 {
        (
            EvidenceLabel::Extensive,
            "At least 2 shapes, 2 sprites, and 2 lines of text are placed on the screen.",
        )
    } else if counts.shapes >= 1 && counts.sprites >= 2 && counts.text >= 1 {
        (
            EvidenceLabel::Convincing,
            "At least 1 shape, 2 sprites, and 1 line of text are placed on the screen.",
        )
    } else if counts.total() >= 3 {
        (
            EvidenceLabel::Limited,
            "At least 3 elements in total are placed on the screen.",
        )
    } else {
        (
            EvidenceLabel::No,
            "Fewer than 3 elements are placed on the screen.",
        )
    };

    if label.is_passing() {
        evidence.object_types(features);
    } else {
        evidence.total_objects(features);
    }
    evidence.done(label, rule)
}

fn u3l14_position(features: &CodeFeatures) -> TreeAssessment {
    let counts = features.object_counts();
    let random = features.movement.random.len();
    let counter = features.movement.counter.len();
    let mut evidence = Evidence::default();

    let (label, rule) = if counts.shapes >= 2
        && counts.sprites >= 2
        && counts.text >= 2
        && random > 0
        && counter > 0
    {
        (
            EvidenceLabel::Extensive,
            "At least 2 shapes, 2 sprites, and 2 lines of text, moving both randomly and with a counter.",
        )
    } else if counts.shapes >= 1 && counts.sprites >= 2 && counts.text >= 1 && random + counter > 0
    {
        (
            EvidenceLabel::Convincing,
            "At least 1 shape, 2 sprites, and 1 line of text, with some movement.",
        )
    } else if counts.total() >= 3 {
        (
            EvidenceLabel::Limited,
            "At least 3 elements in total are placed on the screen.",
        )
    } else {
        (
            EvidenceLabel::No,
            "Fewer than 3 elements are placed on the screen.",
        )
    };

    if label.is_passing() {
        evidence.object_types(features);
        evidence.movement(features);
    } else {
        evidence.total_objects(features);
    }
    evidence.done(label, rule)
}

fn u3l18_position(features: &CodeFeatures) -> TreeAssessment {
    let counts = features.object_counts();
    let other = counts.shapes + counts.text;
    let random = features.movement.random.len();
    let counter = features.movement.counter.len();
    let mut evidence = Evidence::default();

    let (label, rule) = if counts.sprites >= 3 && other >= 1 && counter > 0 && random > 0 {
        (
            EvidenceLabel::Extensive,
            "At least 3 sprites and 1 other element, moving both randomly and with a counter.",
        )
    } else if counts.sprites >= 2 && other > 0 && random + counter > 0 {
        (
            EvidenceLabel::Convincing,
            "At least 2 sprites and 1 other element, with some movement.",
        )
    } else if counts.total() >= 1 {
        (
            EvidenceLabel::Limited,
            "At least 1 element is placed on the screen.",
        )
    } else {
        (
            EvidenceLabel::No,
            "No elements are placed on the screen.",
        )
    };

    if label.is_passing() {
        evidence.sprites_and_other_elements(features);
        evidence.movement(features);
    } else {
        evidence.total_objects(features);
    }
    evidence.done(label, rule)
}

fn u3l14_modularity(features: &CodeFeatures) -> TreeAssessment {
    let sprites = features.object_counts().sprites;
    let updated_in_draw = distinct_objects(sprite_changes(features, true));
    let mut evidence = Evidence::default();
    evidence.sprites(features);
    evidence.property_changes(features);

    let (label, rule) = if sprites >= 2 && updated_in_draw >= 2 {
        (
            EvidenceLabel::Extensive,
            "At least 2 sprites, with at least 2 of them updated in the draw loop.",
        )
    } else if sprites >= 1 && updated_in_draw >= 1 {
        (
            EvidenceLabel::Convincing,
            "At least 1 sprite, updated in the draw loop.",
        )
    } else if sprites >= 1 {
        (EvidenceLabel::Limited, "At least 1 sprite is created.")
    } else {
        (EvidenceLabel::No, "No sprites are created.")
    };
    evidence.done(label, rule)
}

fn u3l18_modularity(features: &CodeFeatures) -> TreeAssessment {
    let sprites = features.object_counts().sprites;
    let updated_in_draw = distinct_objects(sprite_changes(features, true));
    let mut evidence = Evidence::default();
    evidence.sprites(features);
    evidence.property_changes(features);

    let (label, rule) = if sprites >= 3 && updated_in_draw >= 3 {
        (
            EvidenceLabel::Extensive,
            "At least 3 sprites, with at least 3 of them updated in the draw loop.",
        )
    } else if sprites >= 1 && updated_in_draw >= 1 {
        (
            EvidenceLabel::Convincing,
            "At least 1 sprite, updated in the draw loop.",
        )
    } else if sprites >= 1 {
        (EvidenceLabel::Limited, "At least 1 sprite is created.")
    } else {
        // This lesson never grades below Limited Evidence
        (EvidenceLabel::Limited, "No sprites are created.")
    };
    evidence.done(label, rule)
}

fn u3l18_conditionals(features: &CodeFeatures) -> TreeAssessment {
    let in_draw: Vec<_> = features.conditionals.iter().filter(|c| c.draw_loop).collect();
    let has = |trigger| in_draw.iter().any(|c| c.trigger == trigger);
    let user = has(Trigger::User);
    let state = has(Trigger::Variable) || has(Trigger::Object);

    let mut evidence = Evidence::default();
    evidence.conditionals(features, Trigger::User, "conditional triggered by user interaction");
    evidence.conditionals(features, Trigger::Variable, "conditional triggered by variable value");
    evidence.conditionals(
        features,
        Trigger::Object,
        "conditional triggered by object property value",
    );

    let (label, rule) = if in_draw.len() >= 3 && user && state {
        (
            EvidenceLabel::Extensive,
            "At least 3 conditionals in the draw loop, responding to user input and to a variable or sprite property.",
        )
    } else if in_draw.len() >= 2 && user && state {
        (
            EvidenceLabel::Convincing,
            "At least 2 conditionals in the draw loop, responding to user input and to a variable or sprite property.",
        )
    } else if !in_draw.is_empty() && (user || state) {
        (
            EvidenceLabel::Limited,
            "Conditionals in the draw loop respond to only one kind of trigger.",
        )
    } else {
        (
            EvidenceLabel::No,
            "No conditionals respond to user input, variables, or sprite properties.",
        )
    };
    evidence.done(label, rule)
}

/// Shared by the L21 and L24 trees, which differ only in thresholds
fn sprite_setup(
    features: &CodeFeatures,
    thresholds: [(usize, usize, usize); 2],
    rules: [&'static str; 4],
) -> TreeAssessment {
    let sprites = features.object_counts().sprites;
    let animated = distinct_objects(
        sprite_changes(features, false).filter(|c| c.is_method("setAnimation")),
    );
    let moving = distinct_objects(
        sprite_changes(features, false).filter(|c| c.property_contains("velocity")),
    );

    let mut evidence = Evidence::default();
    evidence.sprites(features);
    evidence.animations(features);
    evidence.velocities(features);

    let meets = |(s, a, v): (usize, usize, usize)| sprites >= s && animated >= a && moving >= v;
    let label = if meets(thresholds[0]) {
        EvidenceLabel::Extensive
    } else if meets(thresholds[1]) {
        EvidenceLabel::Convincing
    } else if meets((2, 2, 0)) {
        EvidenceLabel::Limited
    } else {
        EvidenceLabel::No
    };
    let rule = match label {
        EvidenceLabel::Extensive => rules[0],
        EvidenceLabel::Convincing => rules[1],
        EvidenceLabel::Limited => rules[2],
        EvidenceLabel::No => rules[3],
    };
    evidence.done(label, rule)
}

fn u3l21_modularity(features: &CodeFeatures) -> TreeAssessment {
    sprite_setup(
        features,
        [(3, 3, 2), (2, 2, 1)],
        [
            "At least 3 animated sprites, with 2 velocities set outside the draw loop.",
            "At least 2 animated sprites, with a velocity set outside the draw loop.",
            "At least 2 animated sprites, with no velocity set outside the draw loop.",
            "Fewer than 2 sprites are created and animated.",
        ],
    )
}

fn u3l24_modularity(features: &CodeFeatures) -> TreeAssessment {
    sprite_setup(
        features,
        [(4, 4, 2), (3, 3, 1)],
        [
            "At least 4 animated sprites, with 2 obstacle velocities set outside the draw loop.",
            "At least 3 animated sprites, with an obstacle velocity set outside the draw loop.",
            "At least 2 animated sprites, with no obstacle velocity set outside the draw loop.",
            "Fewer than 2 sprites are created and animated.",
        ],
    )
}

fn u3l28_functions(features: &CodeFeatures) -> TreeAssessment {
    let helpers: Vec<_> = features.user_functions.iter().filter(|f| !f.draw_loop).collect();
    let called_more_than_once = features.user_functions.iter().any(|f| f.calls > 1);
    let called = features.user_functions.iter().any(|f| f.calls > 0);

    let mut evidence = Evidence::default();
    for function in &helpers {
        evidence.add(function.lines, format!("definition of {} function", function.name));
    }
    for call in features
        .function_calls
        .iter()
        .filter(|call| helpers.iter().any(|f| f.name == call.function))
    {
        evidence.add(call.lines, format!("call to {} function", call.function));
    }

    let (label, rule) = if helpers.len() >= 3 && called_more_than_once {
        (
            EvidenceLabel::Extensive,
            "At least 3 functions organize the code, and one is called more than once.",
        )
    } else if helpers.len() >= 2 && called {
        (
            EvidenceLabel::Convincing,
            "At least 2 functions organize the code and are called.",
        )
    } else if !helpers.is_empty() && called {
        (
            EvidenceLabel::Limited,
            "At least 1 function is created and called.",
        )
    } else {
        (
            EvidenceLabel::No,
            "No functions are created outside the draw loop and called.",
        )
    };
    evidence.done(label, rule)
}
