//! Static analysis of Game Lab programs
//!
//! [`extract_features`] walks the syntax tree once and records what the
//! decision trees in [`decision_trees`] need. `draw()` is the draw loop: code
//! lexically inside it, including nested callbacks, is flagged as such.

pub mod ast;
pub mod comments;
pub mod decision_trees;
pub mod lexer;
pub mod parser;

use std::collections::HashSet;

use crate::model::features::{
    ChangeTarget, CodeFeatures, Conditional, FunctionCall, LineRange, MovementFeatures, ObjectFeature,
    ObjectKind, PropertyChange, Trigger, UserFunction, VariableDecl,
};
use ast::{Expr, ExprKind, Stmt, StmtKind};

pub use comments::remove_comments;
pub use decision_trees::{TreeAssessment, assess, has_tree};

const DRAW_LOOP: &str = "draw";

/// Canvas constructors with the parameter names of their arguments
const CONSTRUCTORS: &[(&str, ObjectKind, &[&str])] = &[
    ("createSprite", ObjectKind::Sprite, &["x", "y", "w", "h"]),
    ("rect", ObjectKind::Shape, &["x", "y", "w", "h"]),
    ("ellipse", ObjectKind::Shape, &["x", "y", "w", "h"]),
    ("circle", ObjectKind::Shape, &["x", "y", "d"]),
    ("quad", ObjectKind::Shape, &["x1", "y1", "x2", "y2", "x3", "y3", "x4", "y4"]),
    ("triangle", ObjectKind::Shape, &["x1", "y1", "x2", "y2", "x3", "y3"]),
    ("arc", ObjectKind::Shape, &["x", "y", "w", "h", "start", "stop"]),
    ("regularPolygon", ObjectKind::Shape, &["x", "y", "sides", "size"]),
    ("text", ObjectKind::Text, &["str", "x", "y", "w", "h"]),
    ("background", ObjectKind::Background, &["color"]),
];

/// Sprite methods that count as updating the sprite
const TRACKED_METHODS: &[&str] = &[
    "setAnimation",
    "setVelocity",
    "setSpeedAndDirection",
    "setSpeed",
    "addSpeed",
    "setCollider",
    "pointTo",
    "mirrorX",
    "mirrorY",
    "setFrame",
    "nextFrame",
    "pause",
    "play",
];

const MOVEMENT_PROPERTIES: &[&str] = &["x", "y", "rotation", "velocityX", "velocityY"];

const RANDOM_FUNCTIONS: &[&str] = &["randomNumber", "random"];

/// Globals whose members are not student objects
const NAMESPACES: &[&str] = &["World", "Math", "console", "camera", "JSON"];

/// Extract static features from student code. Never fails; statements that
/// cannot be parsed are skipped and listed in `diagnostics`.
pub fn extract_features(source: &str) -> CodeFeatures {
    let program = parser::parse_program(source);
    let mut extractor = Extractor::default();
    extractor.visit_statements(&program.body, false);
    let features = extractor.finish(program.diagnostics);

    tracing::debug!(
        objects = features.objects.len(),
        property_changes = features.property_changes.len(),
        conditionals = features.conditionals.len(),
        user_functions = features.user_functions.len(),
        diagnostics = features.diagnostics.len(),
        "Extracted code features"
    );
    features
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MovementKind {
    Random,
    Counter,
}

#[derive(Debug)]
struct MovementCandidate {
    kind: MovementKind,
    /// Plain variable target; members are always kept
    variable: Option<String>,
    lines: LineRange,
}

#[derive(Debug, Default)]
struct Extractor {
    objects: Vec<ObjectFeature>,
    property_changes: Vec<PropertyChange>,
    conditionals: Vec<Conditional>,
    movement: Vec<MovementCandidate>,
    variables: Vec<VariableDecl>,
    global_variables: HashSet<String>,
    functions: Vec<(String, LineRange, bool)>,
    calls: Vec<FunctionCall>,
}

impl Extractor {
    fn visit_statements(&mut self, body: &[Stmt], draw_loop: bool) {
        for stmt in body {
            self.visit_statement(stmt, draw_loop);
        }
    }

    fn visit_statement(&mut self, stmt: &Stmt, draw_loop: bool) {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                if let ExprKind::Assign { op: "=", target, value } = &expr.kind
                    && let Some(name) = target.as_ident()
                    && let ExprKind::Function { body, .. } = &value.kind
                {
                    self.visit_function(name, stmt.span, body, draw_loop);
                } else {
                    self.visit_expression(expr, draw_loop, None);
                }
            }
            StmtKind::Var(declarations) => {
                for declarator in declarations {
                    let name = declarator.target.as_ident();
                    if let Some(name) = name {
                        self.variables.push(VariableDecl {
                            name: name.to_string(),
                            lines: declarator.span,
                        });
                        if !draw_loop {
                            self.global_variables.insert(name.to_string());
                        }
                    }
                    let Some(init) = &declarator.init else {
                        continue;
                    };
                    if let (Some(name), ExprKind::Function { body, .. }) = (name, &init.kind) {
                        self.visit_function(name, declarator.span, body, draw_loop);
                    } else {
                        self.visit_expression(init, draw_loop, name);
                    }
                }
            }
            StmtKind::Function { name, body, .. } => {
                self.visit_function(name, stmt.span, body, draw_loop);
            }
            StmtKind::If {
                test,
                consequent,
                alternate,
            } => {
                self.conditionals.push(Conditional {
                    trigger: classify_trigger(test),
                    lines: LineRange::new(stmt.span.start, consequent.span.end),
                    draw_loop,
                });
                self.visit_expression(test, draw_loop, None);
                self.visit_statement(consequent, draw_loop);
                if let Some(alternate) = alternate {
                    self.visit_statement(alternate, draw_loop);
                }
            }
            StmtKind::Block(body) => self.visit_statements(body, draw_loop),
            StmtKind::While { test, body } | StmtKind::DoWhile { body, test } => {
                self.visit_expression(test, draw_loop, None);
                self.visit_statement(body, draw_loop);
            }
            StmtKind::For {
                init,
                test,
                update,
                body,
            } => {
                if let Some(init) = init {
                    self.visit_statement(init, draw_loop);
                }
                for expr in [test, update].into_iter().flatten() {
                    self.visit_expression(expr, draw_loop, None);
                }
                self.visit_statement(body, draw_loop);
            }
            StmtKind::ForEach { left, right, body } => {
                self.visit_statement(left, draw_loop);
                self.visit_expression(right, draw_loop, None);
                self.visit_statement(body, draw_loop);
            }
            StmtKind::Switch {
                discriminant,
                cases,
            } => {
                self.visit_expression(discriminant, draw_loop, None);
                for case in cases {
                    if let Some(test) = &case.test {
                        self.visit_expression(test, draw_loop, None);
                    }
                    self.visit_statements(&case.body, draw_loop);
                }
            }
            StmtKind::Try {
                block,
                handler,
                finalizer,
            } => {
                self.visit_statements(block, draw_loop);
                for body in [handler, finalizer].into_iter().flatten() {
                    self.visit_statements(body, draw_loop);
                }
            }
            StmtKind::Return(Some(expr)) | StmtKind::Throw(expr) => {
                self.visit_expression(expr, draw_loop, None);
            }
            StmtKind::Return(None) | StmtKind::Break | StmtKind::Continue | StmtKind::Empty => {}
        }
    }

    fn visit_function(&mut self, name: &str, lines: LineRange, body: &[Stmt], draw_loop: bool) {
        let is_draw = name == DRAW_LOOP;
        self.functions.push((name.to_string(), lines, is_draw));
        self.visit_statements(body, draw_loop || is_draw);
    }

    /// `binding` is the variable the expression's value is stored in
    fn visit_expression(&mut self, expr: &Expr, draw_loop: bool, binding: Option<&str>) {
        let created = match &expr.kind {
            ExprKind::Assign { op: "=", target, value } => {
                created_object(value, target.as_ident())
            }
            _ => created_object(expr, binding),
        };
        self.objects.extend(created);

        let mut nodes = Vec::new();
        expr.walk(&mut |node| nodes.push(node));
        for node in nodes {
            match &node.kind {
                ExprKind::Call { callee, .. } => {
                    if let Some(function) = callee.as_ident() {
                        self.calls.push(FunctionCall {
                            function: function.to_string(),
                            lines: node.span,
                            draw_loop,
                        });
                    } else if let Some((object, method)) = callee.as_member_of_ident()
                        && TRACKED_METHODS.contains(&method)
                    {
                        self.property_changes.push(PropertyChange {
                            object: object.to_string(),
                            target: ChangeTarget::Method(method.to_string()),
                            lines: node.span,
                            draw_loop,
                        });
                    }
                }
                ExprKind::Assign { op, target, value } => {
                    self.record_write(target, op, Some(value.as_ref()), node.span, draw_loop);
                }
                ExprKind::Update { op, arg, .. } => {
                    self.record_write(arg, op, None, node.span, draw_loop);
                }
                ExprKind::Function { body, .. } => self.visit_statements(body, draw_loop),
                _ => {}
            }
        }
    }

    fn record_write(
        &mut self,
        target: &Expr,
        op: &str,
        value: Option<&Expr>,
        lines: LineRange,
        draw_loop: bool,
    ) {
        let member = target.as_member_of_ident();
        if let Some((object, property)) = member {
            self.property_changes.push(PropertyChange {
                object: object.to_string(),
                target: ChangeTarget::Property(property.to_string()),
                lines,
                draw_loop,
            });
        }

        if !draw_loop {
            return;
        }
        let variable = target.as_ident();
        let tracked = match member {
            Some((_, property)) => MOVEMENT_PROPERTIES.contains(&property),
            None => variable.is_some(),
        };
        if !tracked {
            return;
        }

        let random = value.is_some_and(calls_random);
        let counter = matches!(op, "+=" | "-=" | "++" | "--")
            || (op == "=" && value.is_some_and(|v| v.any(|e| same_reference(e, target))));
        for (hit, kind) in [(random, MovementKind::Random), (counter, MovementKind::Counter)] {
            if hit {
                self.movement.push(MovementCandidate {
                    kind,
                    variable: variable.map(str::to_string),
                    lines,
                });
            }
        }
    }

    fn finish(self, diagnostics: Vec<String>) -> CodeFeatures {
        let object_names: HashSet<&str> = self
            .objects
            .iter()
            .filter_map(|o| o.identifier.as_deref())
            .collect();
        let property_changes = self
            .property_changes
            .into_iter()
            .filter(|change| object_names.contains(change.object.as_str()))
            .collect();

        let mut movement = MovementFeatures::default();
        for candidate in self.movement {
            let keep = candidate
                .variable
                .as_ref()
                .is_none_or(|name| self.global_variables.contains(name));
            if !keep {
                continue;
            }
            match candidate.kind {
                MovementKind::Random => movement.random.push(candidate.lines),
                MovementKind::Counter => movement.counter.push(candidate.lines),
            }
        }
        movement.random.sort_by_key(|lines| lines.start);
        movement.counter.sort_by_key(|lines| lines.start);

        let defined: HashSet<&str> = self.functions.iter().map(|(name, ..)| name.as_str()).collect();
        let user_functions = self
            .functions
            .iter()
            .map(|(name, lines, draw_loop)| UserFunction {
                name: name.clone(),
                lines: *lines,
                calls: self.calls.iter().filter(|c| &c.function == name).count(),
                draw_loop: *draw_loop,
            })
            .collect();
        let function_calls = self
            .calls
            .iter()
            .filter(|call| defined.contains(call.function.as_str()))
            .cloned()
            .collect();

        CodeFeatures {
            objects: self.objects,
            property_changes,
            conditionals: self.conditionals,
            movement,
            variables: self.variables,
            user_functions,
            function_calls,
            diagnostics,
        }
    }
}

fn created_object(expr: &Expr, binding: Option<&str>) -> Option<ObjectFeature> {
    let ExprKind::Call { callee, args } = &expr.kind else {
        return None;
    };
    let name = callee.as_ident()?;
    let (_, kind, params) = CONSTRUCTORS.iter().find(|(c, ..)| *c == name)?;
    let min_args = if *kind == ObjectKind::Background { 1 } else { 2 };
    if args.len() < min_args {
        return None;
    }
    Some(ObjectFeature {
        identifier: binding.map(str::to_string),
        kind: *kind,
        properties: params
            .iter()
            .zip(args)
            .map(|(param, arg)| (param.to_string(), arg.to_string()))
            .collect(),
        lines: expr.span,
    })
}

fn calls_random(expr: &Expr) -> bool {
    expr.any(|e| match &e.kind {
        ExprKind::Call { callee, .. } => {
            callee.as_ident().is_some_and(|f| RANDOM_FUNCTIONS.contains(&f))
                || callee.as_member_of_ident() == Some(("Math", "random"))
        }
        _ => false,
    })
}

fn same_reference(a: &Expr, b: &Expr) -> bool {
    match (a.as_member_of_ident(), b.as_member_of_ident()) {
        (Some(x), Some(y)) => x == y,
        (None, None) => a.as_ident().is_some() && a.as_ident() == b.as_ident(),
        _ => false,
    }
}

fn is_user_input(name: &str) -> bool {
    name.starts_with("key") || name.starts_with("mouse")
}

#[derive(Debug, Default)]
struct TriggerScan {
    user: bool,
    object: bool,
    variable: bool,
}

impl TriggerScan {
    fn visit(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Call { callee, args } => {
                match callee.as_ident() {
                    Some(name) => self.user |= is_user_input(name),
                    None => self.visit(callee),
                }
                args.iter().for_each(|arg| self.visit(arg));
            }
            ExprKind::Member { object, property } => match object.as_ident() {
                Some("World") if is_user_input(property) => self.user = true,
                Some(name) if NAMESPACES.contains(&name) => {}
                Some(_) => self.object = true,
                None => self.visit(object),
            },
            ExprKind::Ident(name) => match name.as_str() {
                "mouseX" | "mouseY" => self.user = true,
                "undefined" | "NaN" | "Infinity" => {}
                _ => self.variable = true,
            },
            _ => expr.children().into_iter().for_each(|child| self.visit(child)),
        }
    }
}

/// User input outranks object properties, which outrank plain variables
fn classify_trigger(test: &Expr) -> Trigger {
    let mut scan = TriggerScan::default();
    scan.visit(test);
    if scan.user {
        Trigger::User
    } else if scan.object {
        Trigger::Object
    } else if scan.variable {
        Trigger::Variable
    } else {
        Trigger::Untracked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EvidenceLabel;

    const SPRITE_LESSON_CODE: &str = r#"background("black");
var animalhead_duck1 = createSprite(352, 200);
var animalhead_frog_1 = createSprite(46, 200);
animalhead_duck1.setAnimation("animalhead_duck1");
animalhead_frog_1.setAnimation("animalhead_frog_1");
animalhead_frog_1.scale = 0.4;
animalhead_duck1.scale = 0.4;
drawSprites();
textSize(20);
fill("white");
text("Fortnite", 175, 200);
rect(50, 240, 75, 25);"#;

    const SPACE_JOKE_CODE: &str = r#"// Create alien sprites and assign animations
var alienBlue = createSprite(100, 200);
alienBlue.setAnimation("alienBlue");
var alienGreen = createSprite(250, 575);
alienGreen.setAnimation("alienGreen");
var textY = 500;
var textX = 25;


function draw() {
  // movement
  textY = textY - 3;
  textX = 25 + randomNumber(-3, 3);
  alienGreen.y = alienGreen.y - 3;
  alienBlue.rotation = random( -5, 5);

  // Draw space background and planets
  background("darkblue");

  noStroke();
  fill("yellow");
  ellipse(375, -50, 300, 300);

  fill("darkgreen");
  ellipse(125, 75, 100, 100);

  fill("blue");
  ellipse(350, 350, 150, 150);

  // Add joke text
  fill("white");
  textSize(20);
  text("What kind of music do planets sing?", textX, 125);
  text("Neptunes!", 200, textY);


  drawSprites();
}"#;

    #[test]
    fn test_object_counts() {
        let features = extract_features(SPRITE_LESSON_CODE);
        assert!(features.diagnostics.is_empty());
        let counts = features.object_counts();
        assert_eq!((counts.shapes, counts.sprites, counts.text), (1, 2, 1));

        let sprite = &features.objects[1];
        assert_eq!(sprite.identifier.as_deref(), Some("animalhead_duck1"));
        assert_eq!(
            sprite.properties,
            vec![("x".to_string(), "352".to_string()), ("y".to_string(), "200".to_string())]
        );
        assert_eq!(features.objects[0].kind, ObjectKind::Background);
        assert_eq!(features.objects[3].lines, LineRange::single(11));
    }

    #[test]
    fn test_property_changes() {
        let features = extract_features(SPRITE_LESSON_CODE);
        let changes: Vec<_> = features
            .property_changes
            .iter()
            .map(|c| (c.object.as_str(), c.target.clone(), c.lines.start, c.draw_loop))
            .collect();
        assert_eq!(
            changes,
            vec![
                ("animalhead_duck1", ChangeTarget::Method("setAnimation".into()), 4, false),
                ("animalhead_frog_1", ChangeTarget::Method("setAnimation".into()), 5, false),
                ("animalhead_frog_1", ChangeTarget::Property("scale".into()), 6, false),
                ("animalhead_duck1", ChangeTarget::Property("scale".into()), 7, false),
            ]
        );
    }

    #[test]
    fn test_position_assessment_from_source() {
        let features = extract_features(SPRITE_LESSON_CODE);
        let result = assess(
            &features,
            "Position - Elements and the Coordinate System",
            Some("csd3-2023-L11"),
        )
        .unwrap();
        assert_eq!(result.label, EvidenceLabel::Convincing);
        assert_eq!(
            result.evidence,
            vec![
                "Line 2: Code contains 2 sprites",
                "Line 3: Code contains 2 sprites",
                "Line 11: Code contains 1 line of text",
                "Line 12: Code contains 1 shape",
            ]
        );
    }

    #[test]
    fn test_movement_in_draw_loop() {
        let features = extract_features(SPACE_JOKE_CODE);
        assert!(features.diagnostics.is_empty(), "{:?}", features.diagnostics);
        let starts = |lines: &[LineRange]| lines.iter().map(|l| l.start).collect::<Vec<_>>();
        assert_eq!(starts(&features.movement.random), vec![13, 15]);
        assert_eq!(starts(&features.movement.counter), vec![12, 14]);

        let counts = features.object_counts();
        assert_eq!((counts.shapes, counts.sprites, counts.text), (3, 2, 2));

        let draw = features.user_functions.iter().find(|f| f.name == "draw").unwrap();
        assert!(draw.draw_loop);
        assert_eq!(draw.lines, LineRange::new(10, 38));

        let rotation = features
            .property_changes
            .iter()
            .find(|c| c.target == ChangeTarget::Property("rotation".into()))
            .unwrap();
        assert!(rotation.draw_loop);

        let result = assess(&features, "Position and Movement", Some("csd3-2023-L14")).unwrap();
        assert_eq!(result.label, EvidenceLabel::Extensive);
    }

    #[test]
    fn test_conditional_triggers() {
        let code = r#"var player = createSprite(200, 200);
var score = 0;
if (score > 10) {
  score = 0;
}
function draw() {
  if (keyDown("up")) {
    player.y = player.y - 5;
  }
  if (player.x > 400) {
    player.x = 0;
  } else if (score > 3) {
    player.visible = false;
  }
  if (true) {}
}"#;
        let features = extract_features(code);
        let triggers: Vec<_> = features
            .conditionals
            .iter()
            .map(|c| (c.trigger, c.lines, c.draw_loop))
            .collect();
        assert_eq!(
            triggers,
            vec![
                (Trigger::Variable, LineRange::new(3, 5), false),
                (Trigger::User, LineRange::new(7, 9), true),
                (Trigger::Object, LineRange::new(10, 12), true),
                (Trigger::Variable, LineRange::new(12, 14), true),
                (Trigger::Untracked, LineRange::single(15), true),
            ]
        );

        let result = assess(
            &features,
            "Algorithms and Control - Conditionals",
            Some("csd3-2023-L18"),
        )
        .unwrap();
        assert_eq!(result.label, EvidenceLabel::Extensive);
    }

    #[test]
    fn test_user_functions_and_calls() {
        let code = r#"var player = createSprite(200, 200);
function draw() {
  drawBackground();
  moveSprites();
  moveSprites();
}
function drawBackground() {
  background("blue");
}
function moveSprites() {
  player.x += 1;
}
var showScore = function() {
  text("Score", 10, 10);
};
showScore();"#;
        let features = extract_features(code);
        let functions: Vec<_> = features
            .user_functions
            .iter()
            .map(|f| (f.name.as_str(), f.calls, f.draw_loop))
            .collect();
        assert_eq!(
            functions,
            vec![
                ("draw", 0, true),
                ("drawBackground", 1, false),
                ("moveSprites", 2, false),
                ("showScore", 1, false),
            ]
        );
        assert_eq!(features.function_calls.len(), 4);

        // player.x += 1 in a helper is not draw-loop movement
        assert!(features.movement.counter.is_empty());

        let result = assess(&features, "Modularity - Use of Functions", Some("csd3-2023-L28")).unwrap();
        assert_eq!(result.label, EvidenceLabel::Extensive);
        assert!(result.evidence.contains(&"Lines 7-9: definition of drawBackground function".to_string()));
        assert!(result.evidence.contains(&"Line 16: call to showScore function".to_string()));
    }

    #[test]
    fn test_unparseable_statement_is_skipped() {
        let code = "var a = createSprite(1, 2);\nvar = ;\nrect(1, 2, 3, 4);";
        let features = extract_features(code);
        assert_eq!(features.diagnostics.len(), 1);
        assert_eq!(features.object_counts().total(), 2);
    }

    #[test]
    fn test_loop_counter_is_not_movement() {
        let code = "function draw() {\n  for (var i = 0; i < 3; i++) {\n    rect(i, 0, 1, 1);\n  }\n}";
        let features = extract_features(code);
        assert!(features.movement.counter.is_empty());
    }

    #[test]
    fn test_changes_to_non_objects_ignored() {
        let code = "World.frameRate = 10;\nvar s = createSprite(1, 2);\ns.velocityX = 3;";
        let features = extract_features(code);
        assert_eq!(features.property_changes.len(), 1);
        assert_eq!(features.property_changes[0].object, "s");
    }
}
