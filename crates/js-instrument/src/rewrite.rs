//! Construct rewriting.
//!
//! The rewriter walks the parsed program once and collects span-anchored
//! text edits for the three instrumented construct families: declarations
//! with initializers, assignments, and update expressions. Nested rewrites
//! are folded innermost-first: when an enclosing construct rebuilds its
//! text, it absorbs the edits already recorded inside its span, so the
//! emitted text is never re-walked.

use oxc_ast::ast::{
    ArrowFunctionExpression, AssignmentExpression, AssignmentTarget,
    AssignmentTargetMaybeDefault, AssignmentTargetProperty, AwaitExpression, BindingPattern,
    Expression, ForStatement, ForStatementInit, Function, PropertyKey, SimpleAssignmentTarget,
    UpdateExpression, UpdateOperator, VariableDeclaration, VariableDeclarationKind,
};
use oxc_ast_visit::{walk, Visit};
use oxc_span::{GetSpan, Span};
use oxc_syntax::scope::ScopeFlags;

use crate::pattern::{self, Pattern, PatternProperty, PropertyAccess};
use crate::transform::HOOK_NAME;

#[derive(Debug, Clone)]
struct Edit {
    span: Span,
    text: String,
}

/// Applies `edits` to `base`, which starts at `base_start` in the original
/// source. Edits must not straddle one another; an edit beginning inside an
/// already-applied one has been superseded and is skipped.
fn splice(base: &str, base_start: u32, mut edits: Vec<Edit>) -> String {
    edits.sort_by_key(|edit| edit.span.start);
    let mut out = String::with_capacity(base.len() + 64);
    let mut cursor = 0usize;
    for edit in edits {
        let start = (edit.span.start - base_start) as usize;
        let end = (edit.span.end - base_start) as usize;
        if start < cursor {
            continue;
        }
        out.push_str(&base[cursor..start]);
        out.push_str(&edit.text);
        cursor = end;
    }
    out.push_str(&base[cursor..]);
    out
}

/// True when `expression` suspends — contains an `await` that is not hidden
/// behind a nested function boundary. Such an expression cannot move into a
/// synchronous closure.
fn contains_await(expression: &Expression<'_>) -> bool {
    struct Finder {
        found: bool,
    }
    impl<'a> Visit<'a> for Finder {
        fn visit_await_expression(&mut self, _it: &AwaitExpression<'a>) {
            self.found = true;
        }
        fn visit_function(&mut self, _it: &Function<'a>, _flags: ScopeFlags) {}
        fn visit_arrow_function_expression(&mut self, _it: &ArrowFunctionExpression<'a>) {}
    }
    let mut finder = Finder { found: false };
    finder.visit_expression(expression);
    finder.found
}

/// Renders `value` as a double-quoted JS string literal.
fn js_string_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            ch if (ch as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", ch as u32));
            }
            ch => out.push(ch),
        }
    }
    out.push('"');
    out
}

pub(crate) struct Rewriter<'a> {
    source: &'a str,
    edits: Vec<Edit>,
    temp_seq: usize,
    for_init_spans: Vec<Span>,
}

impl<'a> Rewriter<'a> {
    pub(crate) fn new(source: &'a str) -> Self {
        Self {
            source,
            edits: Vec::new(),
            temp_seq: 0,
            for_init_spans: Vec::new(),
        }
    }

    pub(crate) fn into_output(self) -> String {
        splice(self.source, 0, self.edits)
    }

    fn snippet(&self, span: Span) -> &'a str {
        &self.source[span.start as usize..span.end as usize]
    }

    fn take_edits_within(&mut self, span: Span) -> Vec<Edit> {
        let mut inside = Vec::new();
        let mut kept = Vec::with_capacity(self.edits.len());
        for edit in self.edits.drain(..) {
            if edit.span.start >= span.start && edit.span.end <= span.end {
                inside.push(edit);
            } else {
                kept.push(edit);
            }
        }
        self.edits = kept;
        inside
    }

    /// Source text of `span` with any already-recorded edits inside it
    /// applied. The absorbed edits are removed from the pending set.
    fn current_text(&mut self, span: Span) -> String {
        let inner = self.take_edits_within(span);
        if inner.is_empty() {
            self.snippet(span).to_string()
        } else {
            splice(self.snippet(span), span.start, inner)
        }
    }

    fn push_edit(&mut self, span: Span, text: String) {
        self.edits.push(Edit { span, text });
    }

    /// Replaces `span` wholesale; anything recorded inside it is superseded.
    fn replace(&mut self, span: Span, text: String) {
        let _ = self.take_edits_within(span);
        self.push_edit(span, text);
    }

    /// Mints an identifier that occurs nowhere in the source text.
    fn fresh_temp(&mut self, stem: &str) -> String {
        loop {
            let candidate = format!("_{}{}", stem, self.temp_seq);
            self.temp_seq += 1;
            if !self.source.contains(&candidate) {
                return candidate;
            }
        }
    }

    fn hook_call(&self, name: &str, value: &str) -> String {
        format!("{}({}, {})", HOOK_NAME, js_string_literal(name), value)
    }

    /// Hook wrapper for a value position. An awaited value cannot simply be
    /// wrapped in place; the suspension moves into an async closure that is
    /// awaited at the original position, keeping program order intact.
    fn hooked_value(&self, name: &str, value: &Expression<'a>, value_text: &str) -> String {
        if matches!(value, Expression::AwaitExpression(_)) {
            format!(
                "await (async () => {{ return {}; }})()",
                self.hook_call(name, value_text)
            )
        } else {
            self.hook_call(name, value_text)
        }
    }

    // ---- pattern conversion -------------------------------------------------

    fn convert_binding_pattern(&mut self, binding: &BindingPattern<'a>) -> Pattern {
        match binding {
            BindingPattern::BindingIdentifier(id) => Pattern::Name(id.name.to_string()),
            BindingPattern::ArrayPattern(array) => {
                let mut elements = Vec::with_capacity(array.elements.len());
                for element in &array.elements {
                    elements.push(element.as_ref().map(|p| self.convert_binding_pattern(p)));
                }
                let rest = array
                    .rest
                    .as_ref()
                    .map(|rest| Box::new(self.convert_binding_pattern(&rest.argument)));
                Pattern::Array { elements, rest }
            }
            BindingPattern::ObjectPattern(object) => {
                let mut properties = Vec::with_capacity(object.properties.len());
                for property in &object.properties {
                    properties.push(PatternProperty {
                        key: self.convert_property_key(&property.key),
                        value: self.convert_binding_pattern(&property.value),
                    });
                }
                let rest = object
                    .rest
                    .as_ref()
                    .map(|rest| Box::new(self.convert_binding_pattern(&rest.argument)));
                Pattern::Object { properties, rest }
            }
            BindingPattern::AssignmentPattern(defaulted) => Pattern::Default {
                inner: Box::new(self.convert_binding_pattern(&defaulted.left)),
                default_src: self.current_text(defaulted.right.span()),
            },
        }
    }

    fn convert_property_key(&mut self, key: &PropertyKey<'a>) -> PropertyAccess {
        match key {
            // Non-computed identifier keys become `.name` accesses; string,
            // numeric and computed keys all read through brackets.
            PropertyKey::StaticIdentifier(id) => PropertyAccess::Static(id.name.to_string()),
            _ => PropertyAccess::Computed(self.current_text(key.span())),
        }
    }

    fn convert_assignment_target(&mut self, target: &AssignmentTarget<'a>) -> Pattern {
        match target {
            AssignmentTarget::AssignmentTargetIdentifier(id) => Pattern::Name(id.name.to_string()),
            AssignmentTarget::ArrayAssignmentTarget(array) => {
                let mut elements = Vec::with_capacity(array.elements.len());
                for element in &array.elements {
                    elements.push(element.as_ref().map(|t| self.convert_maybe_default(t)));
                }
                let rest = array
                    .rest
                    .as_ref()
                    .map(|rest| Box::new(self.convert_assignment_target(&rest.target)));
                Pattern::Array { elements, rest }
            }
            AssignmentTarget::ObjectAssignmentTarget(object) => {
                let mut properties = Vec::with_capacity(object.properties.len());
                for property in &object.properties {
                    properties.push(self.convert_target_property(property));
                }
                let rest = object
                    .rest
                    .as_ref()
                    .map(|rest| Box::new(self.convert_assignment_target(&rest.target)));
                Pattern::Object { properties, rest }
            }
            other => {
                // member targets and anything else assign through their own
                // source text
                let span = other.span();
                Pattern::Target {
                    name: self.snippet(span).to_string(),
                    assign: self.current_text(span),
                }
            }
        }
    }

    fn convert_target_property(&mut self, property: &AssignmentTargetProperty<'a>) -> PatternProperty {
        match property {
            AssignmentTargetProperty::AssignmentTargetPropertyIdentifier(shorthand) => {
                let binding = Pattern::Name(shorthand.binding.name.to_string());
                let value = match &shorthand.init {
                    Some(init) => Pattern::Default {
                        inner: Box::new(binding),
                        default_src: self.current_text(init.span()),
                    },
                    None => binding,
                };
                PatternProperty {
                    key: PropertyAccess::Static(shorthand.binding.name.to_string()),
                    value,
                }
            }
            AssignmentTargetProperty::AssignmentTargetPropertyProperty(keyed) => PatternProperty {
                key: self.convert_property_key(&keyed.name),
                value: self.convert_maybe_default(&keyed.binding),
            },
        }
    }

    fn convert_maybe_default(&mut self, target: &AssignmentTargetMaybeDefault<'a>) -> Pattern {
        match target {
            AssignmentTargetMaybeDefault::AssignmentTargetWithDefault(defaulted) => {
                Pattern::Default {
                    inner: Box::new(self.convert_assignment_target(&defaulted.binding)),
                    default_src: self.current_text(defaulted.init.span()),
                }
            }
            other => match other.as_assignment_target() {
                Some(target) => self.convert_assignment_target(target),
                None => {
                    let span = other.span();
                    Pattern::Target {
                        name: self.snippet(span).to_string(),
                        assign: self.current_text(span),
                    }
                }
            },
        }
    }

    // ---- construct rewrites -------------------------------------------------

    fn rewrite_declaration(&mut self, declaration: &VariableDeclaration<'a>) {
        // a `for(;;)` head cannot be split into multiple statements
        let statement_position = !self.for_init_spans.contains(&declaration.span);
        let needs_expansion = statement_position
            && declaration.declarations.iter().any(|declarator| {
                declarator.init.is_some()
                    && !matches!(&declarator.id, BindingPattern::BindingIdentifier(_))
            });

        if !needs_expansion {
            for declarator in &declaration.declarations {
                let Some(init) = &declarator.init else { continue };
                let name = match &declarator.id {
                    BindingPattern::BindingIdentifier(id) => id.name.to_string(),
                    pattern => self.snippet(pattern.span()).to_string(),
                };
                let init_text = self.current_text(init.span());
                let wrapped = self.hooked_value(&name, init, &init_text);
                self.push_edit(init.span(), wrapped);
            }
            return;
        }

        let kind = match declaration.kind {
            VariableDeclarationKind::Var => "var",
            VariableDeclarationKind::Const => "const",
            _ => "let",
        };
        let mut statements: Vec<String> = Vec::new();
        let mut pending: Vec<String> = Vec::new();
        for declarator in &declaration.declarations {
            match (&declarator.id, &declarator.init) {
                (BindingPattern::BindingIdentifier(id), Some(init)) => {
                    let init_text = self.current_text(init.span());
                    let wrapped = self.hooked_value(id.name.as_str(), init, &init_text);
                    pending.push(format!("{} = {}", id.name, wrapped));
                }
                (id, Some(init)) => {
                    // bind the source value once, then one declaration per
                    // walker pair; bindings follow their holder immediately
                    // so later declarators in the statement can read them
                    let pattern_text = self.snippet(id.span()).to_string();
                    let init_text = self.current_text(init.span());
                    let wrapped = self.hooked_value(&pattern_text, init, &init_text);
                    let holder = self.fresh_temp("hold");
                    let pattern = self.convert_binding_pattern(id);
                    pending.push(format!("{} = {}", holder, wrapped));
                    statements.push(format!("{} {};", kind, pending.join(", ")));
                    pending.clear();
                    let pairs = pattern::flatten(&pattern, &holder);
                    if !pairs.is_empty() {
                        let bindings: Vec<String> = pairs
                            .iter()
                            .map(|pair| {
                                format!("{} = {}", pair.name, self.hook_call(&pair.name, &pair.accessor))
                            })
                            .collect();
                        statements.push(format!("{} {};", kind, bindings.join(", ")));
                    }
                }
                (id, None) => {
                    pending.push(self.snippet(id.span()).to_string());
                }
            }
        }
        if !pending.is_empty() {
            statements.push(format!("{} {};", kind, pending.join(", ")));
        }
        let rebuilt = statements.join(" ");
        // `var` may legally stand where only a single statement fits (an
        // unbraced `if` arm); a block keeps the expansion one statement
        // without changing var scoping. Lexical kinds cannot appear there.
        let rebuilt = if matches!(declaration.kind, VariableDeclarationKind::Var) {
            format!("{{ {} }}", rebuilt)
        } else {
            rebuilt
        };
        self.replace(declaration.span, rebuilt);
    }

    fn rewrite_assignment(&mut self, assignment: &AssignmentExpression<'a>) {
        match &assignment.left {
            AssignmentTarget::ArrayAssignmentTarget(_)
            | AssignmentTarget::ObjectAssignmentTarget(_) => {
                self.rewrite_destructuring_assignment(assignment);
            }
            target => {
                // only the right-hand side changes; the target keeps its own
                // evaluation order and side effects
                let name = match target {
                    AssignmentTarget::AssignmentTargetIdentifier(id) => id.name.to_string(),
                    other => self.snippet(other.span()).to_string(),
                };
                let value_text = self.current_text(assignment.right.span());
                let wrapped = self.hooked_value(&name, &assignment.right, &value_text);
                self.push_edit(assignment.right.span(), wrapped);
            }
        }
    }

    /// `[a, b] = rhs` becomes an immediately-invoked closure that binds the
    /// holder, assigns each elementary binding through the hook, and returns
    /// the holder, so the assignment expression's own value is preserved.
    fn rewrite_destructuring_assignment(&mut self, assignment: &AssignmentExpression<'a>) {
        let pattern_text = self.snippet(assignment.left.span()).to_string();
        let value_text = self.current_text(assignment.right.span());
        let is_suspension = contains_await(&assignment.right);
        let pattern = self.convert_assignment_target(&assignment.left);
        let holder = self.fresh_temp("hold");
        let pairs = pattern::flatten(&pattern, &holder);

        let mut body: Vec<String> = Vec::new();
        body.push(format!(
            "const {} = {};",
            holder,
            self.hook_call(&pattern_text, &value_text)
        ));
        for pair in &pairs {
            body.push(format!(
                "{} = {};",
                pair.assign,
                self.hook_call(&pair.name, &pair.accessor)
            ));
        }
        body.push(format!("return {};", holder));
        let body = body.join(" ");

        let replacement = if is_suspension {
            format!("await (async () => {{ {} }})()", body)
        } else {
            format!("(() => {{ {} }})()", body)
        };
        self.replace(assignment.span, replacement);
    }

    fn rewrite_update(&mut self, update: &UpdateExpression<'a>) {
        let op = match update.operator {
            UpdateOperator::Increment => "+",
            UpdateOperator::Decrement => "-",
        };
        let name = self.snippet(update.argument.span()).to_string();
        let replacement = match &update.argument {
            SimpleAssignmentTarget::AssignmentTargetIdentifier(id) => {
                let ident = id.name.to_string();
                if update.prefix {
                    let hook = self.hook_call(&ident, &format!("{ident} {op} 1"));
                    format!("(() => {{ {ident} = {hook}; return {ident}; }})()")
                } else {
                    let prior = self.fresh_temp("old");
                    let hook = self.hook_call(&ident, &format!("{prior} {op} 1"));
                    format!("(() => {{ const {prior} = {ident}; {ident} = {hook}; return {prior}; }})()")
                }
            }
            SimpleAssignmentTarget::StaticMemberExpression(member) => {
                let suspends = contains_await(&member.object);
                let object_text = self.current_text(member.object.span());
                let holder = self.fresh_temp("obj");
                let setup = format!("const {} = {};", holder, object_text);
                let access = format!("{}.{}", holder, member.property.name);
                self.member_update(&name, op, update.prefix, suspends, &setup, &access)
            }
            SimpleAssignmentTarget::ComputedMemberExpression(member) => {
                let suspends =
                    contains_await(&member.object) || contains_await(&member.expression);
                let object_text = self.current_text(member.object.span());
                let key_text = self.current_text(member.expression.span());
                let object_holder = self.fresh_temp("obj");
                let key_holder = self.fresh_temp("key");
                let setup = format!(
                    "const {} = {}; const {} = {};",
                    object_holder, object_text, key_holder, key_text
                );
                let access = format!("{}[{}]", object_holder, key_holder);
                self.member_update(&name, op, update.prefix, suspends, &setup, &access)
            }
            _ => {
                // unrecognized target shape: leave the expression intact and
                // report its value, keyed by the target's source text
                let expression_text = self.current_text(update.span);
                self.hook_call(&name, &expression_text)
            }
        };
        self.replace(update.span, replacement);
    }

    /// Member-target update. The object (and computed key) land in
    /// temporaries exactly once; the hooked next value goes through a
    /// temporary too, so a property accessor fires exactly once in both
    /// prefix and postfix forms. A suspending target keeps its suspension by
    /// moving into an async closure awaited in place.
    fn member_update(
        &mut self,
        name: &str,
        op: &str,
        prefix: bool,
        suspends: bool,
        setup: &str,
        access: &str,
    ) -> String {
        let body = if prefix {
            let next = self.fresh_temp("next");
            let hook = self.hook_call(name, &format!("{access} {op} 1"));
            format!("{setup} const {next} = {hook}; {access} = {next}; return {next};")
        } else {
            let prior = self.fresh_temp("old");
            let hook = self.hook_call(name, &format!("{prior} {op} 1"));
            format!("{setup} const {prior} = {access}; {access} = {hook}; return {prior};")
        };
        if suspends {
            format!("await (async () => {{ {body} }})()")
        } else {
            format!("(() => {{ {body} }})()")
        }
    }
}

impl<'a> Visit<'a> for Rewriter<'a> {
    fn visit_for_statement(&mut self, it: &ForStatement<'a>) {
        if let Some(ForStatementInit::VariableDeclaration(declaration)) = &it.init {
            self.for_init_spans.push(declaration.span);
        }
        walk::walk_for_statement(self, it);
    }

    fn visit_variable_declaration(&mut self, it: &VariableDeclaration<'a>) {
        walk::walk_variable_declaration(self, it);
        self.rewrite_declaration(it);
    }

    fn visit_assignment_expression(&mut self, it: &AssignmentExpression<'a>) {
        walk::walk_assignment_expression(self, it);
        self.rewrite_assignment(it);
    }

    fn visit_update_expression(&mut self, it: &UpdateExpression<'a>) {
        walk::walk_update_expression(self, it);
        self.rewrite_update(it);
    }
}
