use regex_automata::{Anchored, Input, meta::Regex};

struct Replacer {
    regex: Regex,
    replacement: String,
}

impl Replacer {
    /// Rewrites the part of `resource` matched at its start.
    fn replace(&self, resource: &str) -> Option<String> {
        let mut caps = self.regex.create_captures();
        let input = Input::new(resource).anchored(Anchored::Yes);
        self.regex.search_captures(&input, &mut caps);
        let matched = caps.get_match()?;

        let mut result = String::new();
        caps.interpolate_string_into(resource, &self.replacement, &mut result);
        result.push_str(&resource[matched.end()..]);
        Some(result)
    }
}

/// Moves resources to another place within the target branch, for modules
/// that were reorganized between branches.
///
/// Rules apply in order, each one to the result of the previous ones.
#[derive(Default)]
pub(crate) struct ResourceMapping {
    replacers: Vec<Replacer>,
}

impl ResourceMapping {
    pub(crate) fn new<'a>(
        rules: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self, (&'a str, Box<regex_automata::meta::BuildError>)> {
        let mut replacers = Vec::new();
        for (pattern, replacement) in rules {
            let regex = Regex::new(pattern).map_err(|e| (pattern, Box::new(e)))?;
            replacers.push(Replacer {
                regex,
                replacement: replacement.trim_start_matches('/').to_string(),
            });
        }
        Ok(Self { replacers })
    }

    /// Returns `None` when no rule changes `resource`.
    pub(crate) fn map(&self, resource: &str) -> Option<String> {
        let mut current = None::<String>;
        for replacer in self.replacers.iter() {
            if let Some(replaced) = replacer.replace(current.as_deref().unwrap_or(resource)) {
                current = Some(replaced);
            }
        }
        current.filter(|mapped| mapped != resource)
    }
}
