use regex_syntax::hir as regex_hir;

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ParseError {
    Empty,
    InvalidDoubleAsterisk,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "empty pattern"),
            Self::InvalidDoubleAsterisk => write!(f, "'**' must be a whole path component"),
        }
    }
}

fn non_slash() -> regex_hir::Hir {
    regex_hir::Hir::class(regex_hir::Class::Bytes(regex_hir::ClassBytes::new([
        regex_hir::ClassBytesRange::new(u8::MIN, b'/' - 1),
        regex_hir::ClassBytesRange::new(b'/' + 1, u8::MAX),
    ])))
}

fn any_of(sub: regex_hir::Hir) -> regex_hir::Hir {
    regex_hir::Hir::repetition(regex_hir::Repetition {
        min: 0,
        max: None,
        greedy: true,
        sub: Box::new(sub),
    })
}

/// Translates one path component, which may contain `*` and `?`.
fn component_to_hir(component: &str, hir: &mut Vec<regex_hir::Hir>) -> Result<(), ParseError> {
    let mut literal = Vec::new();
    for &byte in component.as_bytes() {
        match byte {
            b'*' | b'?' => {
                if !literal.is_empty() {
                    hir.push(regex_hir::Hir::literal(std::mem::take(&mut literal)));
                }
                if byte == b'*' {
                    if matches!(hir.last(), Some(last) if *last == any_of(non_slash())) {
                        return Err(ParseError::InvalidDoubleAsterisk);
                    }
                    hir.push(any_of(non_slash()));
                } else {
                    hir.push(non_slash());
                }
            }
            _ => literal.push(byte),
        }
    }
    if !literal.is_empty() {
        hir.push(regex_hir::Hir::literal(literal));
    }
    Ok(())
}

/// Patterns without `/` match a single path component, others match the
/// path from its start. `**` stands for any number of components.
fn pattern_to_hir(pattern: &str) -> Result<regex_hir::Hir, ParseError> {
    let pattern = pattern.trim_matches('/');
    if pattern.is_empty() {
        return Err(ParseError::Empty);
    }

    let mut hir = vec![regex_hir::Hir::look(regex_hir::Look::Start)];
    let mut components = pattern.split('/').peekable();
    while let Some(component) = components.next() {
        let is_last = components.peek().is_none();
        if component == "**" {
            if is_last {
                // ".*"
                hir.push(any_of(regex_hir::Hir::dot(regex_hir::Dot::AnyByte)));
            } else {
                // "([^/]*/)*"
                hir.push(any_of(regex_hir::Hir::concat(vec![
                    any_of(non_slash()),
                    regex_hir::Hir::literal(b"/".as_slice()),
                ])));
            }
            continue;
        }
        component_to_hir(component, &mut hir)?;
        if !is_last {
            hir.push(regex_hir::Hir::literal(b"/".as_slice()));
        }
    }
    hir.push(regex_hir::Hir::look(regex_hir::Look::End));

    Ok(regex_hir::Hir::concat(hir))
}

/// A set of glob patterns over slash-separated relative paths.
///
/// A path matches when the path itself or one of its ancestor directories
/// matches, so excluding a directory excludes everything below it.
#[derive(Default)]
pub(crate) struct PathPattern {
    full_path: Option<regex_automata::meta::Regex>,
    component: Option<regex_automata::meta::Regex>,
}

impl PathPattern {
    pub(crate) fn new<'a>(
        patterns: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, (&'a str, ParseError)> {
        let mut full_path_hirs = Vec::new();
        let mut component_hirs = Vec::new();
        for pattern in patterns {
            let hir = pattern_to_hir(pattern).map_err(|e| (pattern, e))?;
            if pattern.trim_matches('/').contains('/') {
                full_path_hirs.push(hir);
            } else {
                component_hirs.push(hir);
            }
        }

        let build = |hirs: &[regex_hir::Hir]| {
            (!hirs.is_empty()).then(|| {
                regex_automata::meta::Builder::new()
                    .build_many_from_hir(hirs)
                    .expect("failed to build regex")
            })
        };

        Ok(Self {
            full_path: build(&full_path_hirs),
            component: build(&component_hirs),
        })
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.full_path.is_none() && self.component.is_none()
    }

    pub(crate) fn is_match(&self, path: &str) -> bool {
        let path = path.trim_matches('/');
        if path.is_empty() || self.is_empty() {
            return false;
        }

        let mut start = 0;
        loop {
            let end = path[start..].find('/').map_or(path.len(), |i| start + i);
            let component = &path[start..end];
            if self
                .component
                .as_ref()
                .is_some_and(|regex| regex.is_match(component))
            {
                return true;
            }
            if self
                .full_path
                .as_ref()
                .is_some_and(|regex| regex.is_match(&path[..end]))
            {
                return true;
            }
            if end == path.len() {
                return false;
            }
            start = end + 1;
        }
    }
}

/// Include and exclude lists applied together.
#[derive(Default)]
pub(crate) struct PathFilter {
    pub(crate) include: PathPattern,
    pub(crate) exclude: PathPattern,
}

impl PathFilter {
    /// An empty include list includes everything.
    pub(crate) fn accepts(&self, path: &str) -> bool {
        (self.include.is_empty() || self.include.is_match(path)) && !self.exclude.is_match(path)
    }
}
