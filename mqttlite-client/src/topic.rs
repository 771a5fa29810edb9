use std::fmt::{self, Display, Formatter, Write};
use std::str::FromStr;

use crate::error::Error;

#[inline]
fn is_metadata(s: &str) -> bool {
    s.starts_with('$')
}

/// One `/`-separated level of a topic filter.
#[derive(Debug, Eq, PartialEq, Clone)]
pub enum Level {
    Normal(String),
    Metadata(String), // $SYS
    Blank,
    SingleWildcard, // +
    MultiWildcard,  // #
}

impl Level {
    fn parse(s: &str) -> Option<Level> {
        match s {
            "+" => Some(Level::SingleWildcard),
            "#" => Some(Level::MultiWildcard),
            "" => Some(Level::Blank),
            _ if s.contains(|c| c == '+' || c == '#') => None,
            _ if is_metadata(s) => Some(Level::Metadata(s.to_owned())),
            _ => Some(Level::Normal(s.to_owned())),
        }
    }

    fn matches(&self, segment: &str) -> bool {
        match self {
            Level::Normal(level) | Level::Metadata(level) => level == segment,
            Level::Blank => segment.is_empty(),
            Level::SingleWildcard | Level::MultiWildcard => !is_metadata(segment),
        }
    }
}

/// A parsed topic filter.
///
/// `#` matches any number of trailing levels and may only terminate a
/// filter; `+` matches exactly one level; `$`-prefixed levels are never
/// matched by either wildcard.
#[derive(Debug, Eq, PartialEq, Clone)]
pub struct Filter(Vec<Level>);

impl Filter {
    #[inline]
    pub fn levels(&self) -> &[Level] {
        &self.0
    }

    fn is_valid(&self) -> bool {
        self.0.iter().enumerate().all(|(pos, level)| match level {
            Level::MultiWildcard => pos == self.0.len() - 1,
            Level::Metadata(_) => pos == 0,
            _ => true,
        })
    }

    /// Matches `topic` against this filter, level by level.
    pub fn matches(&self, topic: &str) -> bool {
        let mut levels = self.0.iter();

        for segment in topic.split('/') {
            match levels.next() {
                Some(Level::MultiWildcard) => return !is_metadata(segment),
                Some(Level::SingleWildcard) if is_metadata(segment) => return false,
                Some(Level::SingleWildcard) => {}
                Some(level) if level.matches(segment) => {}
                _ => return false,
            }
        }

        // a trailing `#` also covers the parent level itself
        match levels.next() {
            None | Some(Level::MultiWildcard) => true,
            Some(_) => false,
        }
    }
}

impl FromStr for Filter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let levels = s
            .split('/')
            .map(Level::parse)
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| Error::InvalidFilter(s.to_owned()))?;

        let filter = Filter(levels);
        if filter.is_valid() {
            Ok(filter)
        } else {
            Err(Error::InvalidFilter(s.to_owned()))
        }
    }
}

impl Display for Level {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Level::Normal(s) | Level::Metadata(s) => f.write_str(s),
            Level::Blank => Ok(()),
            Level::SingleWildcard => f.write_char('+'),
            Level::MultiWildcard => f.write_char('#'),
        }
    }
}

impl Display for Filter {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let mut first = true;

        for level in &self.0 {
            if first {
                first = false;
            } else {
                f.write_char('/')?;
            }

            level.fmt(f)?;
        }

        Ok(())
    }
}
