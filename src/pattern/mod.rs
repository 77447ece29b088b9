mod builtins;
pub mod expr;

pub use builtins::default_patterns;
pub use expr::{compile, CompileError, CompiledPattern};

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::color::{Hsv, Rgb};

/// Inputs for one pattern invocation: animation time (already scaled by
/// the group speed), the normalized pixel coordinate (already scaled by
/// the group scale), and the in-progress color for the pixel.
#[derive(Debug, Clone, Copy)]
pub struct PixelCtx {
    pub t: f32,
    pub x: f32,
    pub prev: Rgb,
}

/// What a pattern produced for one pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PatternValue {
    /// A continuous position to be resolved against the group palette.
    PalettePos(f32),
    Hsv(Hsv),
    Rgb(Rgb),
}

enum PatternKind {
    Compiled(CompiledPattern),
    /// Native function, used by built-in self tests and benchmarks.
    Native(fn(&PixelCtx) -> PatternValue),
}

/// A named pattern: editable source plus the last successfully compiled
/// form. Compile failures keep the previous form and record the errors.
pub struct Pattern {
    pub name: String,
    pub source: String,
    pub default: bool,
    kind: Option<PatternKind>,
    pub errors: Vec<CompileError>,
}

impl Pattern {
    pub fn from_source(
        name: impl Into<String>,
        source: impl Into<String>,
        default: bool,
    ) -> Result<Self, Vec<CompileError>> {
        let source = source.into();
        let compiled = expr::compile(&source)?;
        Ok(Self {
            name: name.into(),
            source,
            default,
            kind: Some(PatternKind::Compiled(compiled)),
            errors: Vec::new(),
        })
    }

    pub fn native(name: impl Into<String>, f: fn(&PixelCtx) -> PatternValue) -> Self {
        Self {
            name: name.into(),
            source: String::new(),
            default: true,
            kind: Some(PatternKind::Native(f)),
            errors: Vec::new(),
        }
    }

    /// Whether a runnable compiled form exists.
    pub fn is_runnable(&self) -> bool {
        self.kind.is_some()
    }

    pub fn eval(&self, ctx: &PixelCtx) -> Option<PatternValue> {
        match self.kind.as_ref()? {
            PatternKind::Compiled(c) => Some(c.eval(ctx)),
            PatternKind::Native(f) => Some(f(ctx)),
        }
    }
}

/// Set of named pattern functions keyed by id. Recompiling a source
/// atomically replaces the compiled form for that id; the registry as a
/// whole is snapshotted per tick by the render loop.
#[derive(Default)]
pub struct PatternRegistry {
    patterns: BTreeMap<u32, Arc<Pattern>>,
}

impl PatternRegistry {
    pub fn with_defaults() -> Self {
        let mut registry = Self::default();
        for (id, pattern) in default_patterns() {
            registry.patterns.insert(id, Arc::new(pattern));
        }
        registry
    }

    pub fn get(&self, id: u32) -> Option<&Arc<Pattern>> {
        self.patterns.get(&id)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.patterns.contains_key(&id)
    }

    pub fn insert(&mut self, id: u32, pattern: Pattern) {
        self.patterns.insert(id, Arc::new(pattern));
    }

    /// Compile `source` for `id`. On success the compiled form replaces
    /// the previous one; on failure the previous form (if any) stays
    /// active and the errors are recorded on the entry and returned.
    pub fn set_source(
        &mut self,
        id: u32,
        name: &str,
        source: &str,
    ) -> Result<(), Vec<CompileError>> {
        match expr::compile(source) {
            Ok(compiled) => {
                self.patterns.insert(
                    id,
                    Arc::new(Pattern {
                        name: name.to_string(),
                        source: source.to_string(),
                        default: false,
                        kind: Some(PatternKind::Compiled(compiled)),
                        errors: Vec::new(),
                    }),
                );
                Ok(())
            }
            Err(errors) => {
                let previous = self.patterns.get(&id);
                let kind = previous.and_then(|p| match &p.kind {
                    Some(PatternKind::Compiled(c)) => {
                        Some(PatternKind::Compiled(c.clone()))
                    }
                    Some(PatternKind::Native(f)) => Some(PatternKind::Native(*f)),
                    None => None,
                });
                let prev_source = previous.map(|p| p.source.clone()).unwrap_or_default();
                self.patterns.insert(
                    id,
                    Arc::new(Pattern {
                        name: name.to_string(),
                        source: prev_source,
                        default: false,
                        kind,
                        errors: errors.clone(),
                    }),
                );
                Err(errors)
            }
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.patterns.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_all_compile() {
        let registry = PatternRegistry::with_defaults();
        assert!(registry.ids().count() >= 6);
        let ctx = PixelCtx {
            t: 0.4,
            x: 0.6,
            prev: Rgb::BLACK,
        };
        for id in registry.ids().collect::<Vec<_>>() {
            let p = registry.get(id).unwrap();
            assert!(p.default);
            assert!(p.eval(&ctx).is_some(), "pattern {id} did not evaluate");
        }
    }

    #[test]
    fn recompile_replaces_atomically() {
        let mut registry = PatternRegistry::with_defaults();
        registry.set_source(42, "user", "palette(t + x)").unwrap();
        let ctx = PixelCtx {
            t: 0.25,
            x: 0.25,
            prev: Rgb::BLACK,
        };
        assert_eq!(
            registry.get(42).unwrap().eval(&ctx),
            Some(PatternValue::PalettePos(0.5))
        );

        // A failed recompile keeps the last good form and records errors.
        let errs = registry.set_source(42, "user", "palette(t +").unwrap_err();
        assert!(!errs.is_empty());
        let p = registry.get(42).unwrap();
        assert!(!p.errors.is_empty());
        assert_eq!(p.eval(&ctx), Some(PatternValue::PalettePos(0.5)));
    }

    #[test]
    fn failed_compile_with_no_prior_form_is_not_runnable() {
        let mut registry = PatternRegistry::default();
        assert!(registry.set_source(7, "broken", "wat(").is_err());
        let p = registry.get(7).unwrap();
        assert!(!p.is_runnable());
        let ctx = PixelCtx {
            t: 0.0,
            x: 0.0,
            prev: Rgb::BLACK,
        };
        assert!(p.eval(&ctx).is_none());
    }
}
