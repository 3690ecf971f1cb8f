//! Lexical scope descriptions and static-analysis facts
//!
//! Both are produced by the front end. The compiler reads them but never
//! computes them.

/// A parsed lexical scope: its variables and the shape of its parameters
///
/// Variable indices are assigned by the front end. Required parameters occupy
/// indices `0..required`, optional parameters the following `optional`
/// indices, and the rest parameter (if any) its own index.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StaticScope {
    variables: Vec<String>,
    required: usize,
    optional: usize,
    rest: Option<usize>,
}

impl StaticScope {
    /// Create a scope declaring the given variables
    pub fn new<I, S>(variables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            variables: variables.into_iter().map(Into::into).collect(),
            required: 0,
            optional: 0,
            rest: None,
        }
    }

    /// Set the number of required positional parameters
    #[must_use]
    pub fn with_required(mut self, required: usize) -> Self {
        self.required = required;
        self
    }

    /// Set the number of optional positional parameters
    #[must_use]
    pub fn with_optional(mut self, optional: usize) -> Self {
        self.optional = optional;
        self
    }

    /// Declare the rest parameter's variable index
    #[must_use]
    pub fn with_rest(mut self, index: usize) -> Self {
        self.rest = Some(index);
        self
    }

    #[must_use]
    pub fn number_of_variables(&self) -> usize {
        self.variables.len()
    }

    #[must_use]
    pub fn variable_names(&self) -> &[String] {
        &self.variables
    }

    #[must_use]
    pub fn required_args(&self) -> usize {
        self.required
    }

    #[must_use]
    pub fn optional_args(&self) -> usize {
        self.optional
    }

    #[must_use]
    pub fn rest_arg(&self) -> Option<usize> {
        self.rest
    }

    /// Returns true if the scope's parameters fit a specific-arity signature:
    /// no optional or rest parameters and at most three required ones
    #[must_use]
    pub fn has_specific_arity(&self) -> bool {
        self.optional == 0 && self.rest.is_none() && self.required <= 3
    }

    /// Largest number of positional arguments accepted, or `None` when a rest
    /// parameter accepts any number
    #[must_use]
    pub fn max_args(&self) -> Option<usize> {
        if self.rest.is_some() {
            None
        } else {
            Some(self.required + self.optional)
        }
    }

    /// Compact form embedded in closure descriptors: names joined by `;`
    #[must_use]
    pub fn encode(&self) -> String {
        self.variables.join(";")
    }

    /// Rebuild the variable list of an encoded scope
    #[must_use]
    pub fn decode(encoded: &str) -> Self {
        if encoded.is_empty() {
            return Self::default();
        }
        Self::new(encoded.split(';'))
    }
}

/// A static fact about a body, reported by the front end's analysis pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Fact {
    /// Contains a nested closure
    Closure = 1 << 0,
    /// Calls methods that may reach into the local variable frame
    /// (`binding`, `eval`, `local_variables` ...)
    ScopeAware = 1 << 1,
    /// Calls methods that may inspect the call frame (`__method__`, `block_given?`)
    FrameAware = 1 << 2,
    /// Declares an explicit `&block` parameter
    BlockArg = 1 << 3,
    /// Calls `eval`
    Eval = 1 << 4,
    /// Contains an argument-less `super`
    ZSuper = 1 << 5,
    /// Opens a class or module body
    Class = 1 << 6,
    /// Defines a method
    Method = 1 << 7,
    /// The body runs inside an enclosing compiled frame
    NestedFrame = 1 << 8,
    /// Block parameters destructure their argument (`|a, (b, c)|`)
    MultipleArgsHead = 1 << 9,
}

/// Summary of static facts about one body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Inspector {
    facts: u16,
}

impl Inspector {
    /// An inspector reporting no facts
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fact
    #[must_use]
    pub fn with(mut self, fact: Fact) -> Self {
        self.facts |= fact as u16;
        self
    }

    #[must_use]
    pub fn has(&self, fact: Fact) -> bool {
        self.facts & fact as u16 != 0
    }

    #[must_use]
    pub fn has_closure(&self) -> bool {
        self.has(Fact::Closure)
    }

    #[must_use]
    pub fn has_scope_aware_methods(&self) -> bool {
        self.has(Fact::ScopeAware) || self.has(Fact::Eval)
    }

    #[must_use]
    pub fn has_frame_aware_methods(&self) -> bool {
        self.has(Fact::FrameAware)
    }

    #[must_use]
    pub fn in_nested_frame(&self) -> bool {
        self.has(Fact::NestedFrame)
    }

    /// Raw fact bits, embedded in closure descriptors
    #[must_use]
    pub fn bits(&self) -> u16 {
        self.facts
    }
}
