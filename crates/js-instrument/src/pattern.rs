//! Destructuring pattern decomposition.
//!
//! A binding pattern is reduced to a flat, ordered list of elementary
//! bindings, each pairing a destination with an accessor expression that
//! reads its value out of a temporary holder. Executing the assignments in
//! order reproduces the pattern's destructuring semantics.

/// Tagged form of a destructuring pattern, detached from the parser AST so
/// the walker is independent of any parser version.
#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    /// Plain identifier binding.
    Name(String),
    /// `[a, , ...rest]` — a `None` element is a hole: nothing is bound but
    /// the index still advances.
    Array {
        elements: Vec<Option<Pattern>>,
        rest: Option<Box<Pattern>>,
    },
    /// `{ a, b: c, [k]: d, ...rest }`
    Object {
        properties: Vec<PatternProperty>,
        rest: Option<Box<Pattern>>,
    },
    /// `pattern = defaultExpr` — the default applies when the read value is
    /// nullish.
    Default {
        inner: Box<Pattern>,
        default_src: String,
    },
    /// A destination that is not a declarable identifier (`obj.x`,
    /// `arr[i]`); only occurs in destructuring assignments. `name` is the
    /// original source text used to key observations, `assign` the text
    /// assigned through (they differ when the target contains rewritten
    /// sub-expressions).
    Target { name: String, assign: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatternProperty {
    pub key: PropertyAccess,
    pub value: Pattern,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyAccess {
    /// `.name` access for a plain identifier key.
    Static(String),
    /// `[expr]` access; carries the key expression's source text. Also used
    /// for string and numeric literal keys.
    Computed(String),
}

/// One elementary binding produced by flattening a pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct BindingPair {
    /// Observation key: an identifier, or the literal text of a member
    /// target.
    pub name: String,
    /// Source expression reading the value from the holder.
    pub accessor: String,
    /// Assignment destination; equals `name` for identifiers.
    pub assign: String,
}

/// Flattens `pattern` against the holder expression `base`.
pub fn flatten(pattern: &Pattern, base: &str) -> Vec<BindingPair> {
    let mut pairs = Vec::new();
    walk(pattern, base, &mut pairs);
    pairs
}

fn walk(pattern: &Pattern, accessor: &str, out: &mut Vec<BindingPair>) {
    match pattern {
        Pattern::Name(name) => out.push(BindingPair {
            name: name.clone(),
            accessor: accessor.to_string(),
            assign: name.clone(),
        }),
        Pattern::Target { name, assign } => out.push(BindingPair {
            name: name.clone(),
            accessor: accessor.to_string(),
            assign: assign.clone(),
        }),
        Pattern::Default { inner, default_src } => {
            // Parenthesized so the defaulted read can serve as a base for
            // further member accesses.
            let with_default = format!("({} ?? {})", accessor, default_src);
            walk(inner, &with_default, out);
        }
        Pattern::Array { elements, rest } => {
            for (index, element) in elements.iter().enumerate() {
                let Some(element) = element else { continue };
                let item = format!("{}[{}]", accessor, index);
                walk(element, &item, out);
            }
            if let Some(rest) = rest {
                let tail = format!("{}.slice({})", accessor, elements.len());
                walk(rest, &tail, out);
            }
        }
        Pattern::Object { properties, rest } => {
            for property in properties {
                let member = match &property.key {
                    PropertyAccess::Static(key) => format!("{}.{}", accessor, key),
                    PropertyAccess::Computed(src) => format!("{}[{}]", accessor, src),
                };
                walk(&property.value, &member, out);
            }
            if let Some(rest) = rest {
                // Reports the whole source object, not the object minus the
                // extracted keys. Pinned by tests; see DESIGN.md.
                walk(rest, accessor, out);
            }
        }
    }
}
