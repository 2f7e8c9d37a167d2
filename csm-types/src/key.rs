//! Course and usage keys.
//!
//! Keys follow the opaque-key formats used by the courseware:
//!
//! - [`CourseKey`]: `course-v1:{org}+{course}+{run}`
//! - [`UsageKey`]: `block-v1:{org}+{course}+{run}+type@{block_type}+block@{block_id}`
//!
//! Both types implement [`Display`](fmt::Display) and [`FromStr`] for their canonical form and
//! serialize as plain strings, so they can be used directly as JSON map keys.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

const COURSE_PREFIX: &str = "course-v1:";
const BLOCK_PREFIX: &str = "block-v1:";
const TYPE_TAG: &str = "type@";
const BLOCK_TAG: &str = "block@";

/// Characters that separate key components and may not appear inside a component.
const RESERVED_CHARS: &[char] = &['+', '@', ':', '/'];

/// An error returned when parsing or constructing a key fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidKeyError {
    /// The key does not start with the expected `course-v1:` or `block-v1:` prefix.
    #[error("expected prefix `{0}`")]
    MissingPrefix(&'static str),
    /// The key does not have the expected number of `+`-separated components.
    #[error("expected {expected} components, found {found}")]
    ComponentCount {
        /// Number of components the key format requires.
        expected: usize,
        /// Number of components found in the input.
        found: usize,
    },
    /// A component is empty.
    #[error("empty {0}")]
    Empty(&'static str),
    /// A component contains a reserved separator character.
    #[error("invalid character {1:?} in {0}")]
    InvalidChar(&'static str, char),
    /// A tagged component is missing its `type@` or `block@` tag.
    #[error("expected tag `{0}`")]
    MissingTag(&'static str),
    /// The block type is not one of the known [`BlockType`]s.
    #[error("unknown block type `{0}`")]
    UnknownBlockType(String),
}

fn validate_component(name: &'static str, value: &str) -> Result<(), InvalidKeyError> {
    if value.is_empty() {
        return Err(InvalidKeyError::Empty(name));
    }
    match value.chars().find(|c| RESERVED_CHARS.contains(c)) {
        Some(c) => Err(InvalidKeyError::InvalidChar(name, c)),
        None => Ok(()),
    }
}

/// Identifies a course run.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CourseKey {
    org: String,
    course: String,
    run: String,
}

impl CourseKey {
    /// Creates and validates a new course key.
    ///
    /// # Examples
    ///
    /// ```
    /// use csm_types::CourseKey;
    ///
    /// let course = CourseKey::new("org", "course", "run").unwrap();
    /// assert_eq!(course.to_string(), "course-v1:org+course+run");
    ///
    /// assert!(CourseKey::new("org", "", "run").is_err());
    /// ```
    pub fn new(org: &str, course: &str, run: &str) -> Result<Self, InvalidKeyError> {
        validate_component("org", org)?;
        validate_component("course", course)?;
        validate_component("run", run)?;

        Ok(Self {
            org: org.to_owned(),
            course: course.to_owned(),
            run: run.to_owned(),
        })
    }

    /// Returns the organization.
    pub fn org(&self) -> &str {
        &self.org
    }

    /// Returns the course number.
    pub fn course(&self) -> &str {
        &self.course
    }

    /// Returns the course run.
    pub fn run(&self) -> &str {
        &self.run
    }

    /// Creates a usage key for a block in this course.
    pub fn make_usage_key(
        &self,
        block_type: BlockType,
        block_id: impl Into<String>,
    ) -> Result<UsageKey, InvalidKeyError> {
        let block_id = block_id.into();
        validate_component("block id", &block_id)?;

        Ok(UsageKey {
            course: self.clone(),
            block_type,
            block_id,
        })
    }

    /// Creates a usage key with a numeric block id, which is always valid.
    pub fn numbered_usage_key(&self, block_type: BlockType, block_id: u32) -> UsageKey {
        UsageKey {
            course: self.clone(),
            block_type,
            block_id: block_id.to_string(),
        }
    }
}

/// The course used by the load model: `course-v1:org+course+run`.
impl Default for CourseKey {
    fn default() -> Self {
        Self {
            org: "org".to_owned(),
            course: "course".to_owned(),
            run: "run".to_owned(),
        }
    }
}

impl fmt::Display for CourseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{COURSE_PREFIX}{}+{}+{}", self.org, self.course, self.run)
    }
}

impl fmt::Debug for CourseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CourseKey({:?})", self.to_string())
    }
}

impl FromStr for CourseKey {
    type Err = InvalidKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix(COURSE_PREFIX)
            .ok_or(InvalidKeyError::MissingPrefix(COURSE_PREFIX))?;

        let parts: Vec<_> = rest.split('+').collect();
        let [org, course, run] = parts[..] else {
            return Err(InvalidKeyError::ComponentCount {
                expected: 3,
                found: parts.len(),
            });
        };

        Self::new(org, course, run)
    }
}

/// The kind of content block, as far as the load model is concerned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BlockType {
    /// A graded problem.
    Problem,
    /// Static HTML content.
    Html,
    /// A sequence (subsection) of verticals.
    Sequence,
    /// A vertical (unit) of leaf blocks.
    Vertical,
}

impl BlockType {
    /// All block types, in canonical order.
    pub const ALL: [BlockType; 4] = [
        BlockType::Problem,
        BlockType::Html,
        BlockType::Sequence,
        BlockType::Vertical,
    ];

    /// Returns the name of the block type as used in usage keys.
    pub fn as_str(self) -> &'static str {
        match self {
            BlockType::Problem => "problem",
            BlockType::Html => "html",
            BlockType::Sequence => "sequence",
            BlockType::Vertical => "vertical",
        }
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BlockType {
    type Err = InvalidKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BlockType::ALL
            .into_iter()
            .find(|ty| ty.as_str() == s)
            .ok_or_else(|| InvalidKeyError::UnknownBlockType(s.to_owned()))
    }
}

/// Identifies a single content block within a course.
///
/// Usage keys are immutable and totally ordered, so they can be stored in sets and used as map
/// keys.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UsageKey {
    course: CourseKey,
    block_type: BlockType,
    block_id: String,
}

impl UsageKey {
    /// Returns the course containing this block.
    pub fn course(&self) -> &CourseKey {
        &self.course
    }

    /// Returns the type of the block.
    pub fn block_type(&self) -> BlockType {
        self.block_type
    }

    /// Returns the block identifier within the course.
    pub fn block_id(&self) -> &str {
        &self.block_id
    }
}

impl fmt::Display for UsageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let CourseKey { org, course, run } = &self.course;
        write!(
            f,
            "{BLOCK_PREFIX}{org}+{course}+{run}+{TYPE_TAG}{}+{BLOCK_TAG}{}",
            self.block_type, self.block_id
        )
    }
}

impl fmt::Debug for UsageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UsageKey({:?})", self.to_string())
    }
}

impl FromStr for UsageKey {
    type Err = InvalidKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix(BLOCK_PREFIX)
            .ok_or(InvalidKeyError::MissingPrefix(BLOCK_PREFIX))?;

        let parts: Vec<_> = rest.split('+').collect();
        let [org, course, run, block_type, block_id] = parts[..] else {
            return Err(InvalidKeyError::ComponentCount {
                expected: 5,
                found: parts.len(),
            });
        };

        let block_type = block_type
            .strip_prefix(TYPE_TAG)
            .ok_or(InvalidKeyError::MissingTag(TYPE_TAG))?
            .parse()?;
        let block_id = block_id
            .strip_prefix(BLOCK_TAG)
            .ok_or(InvalidKeyError::MissingTag(BLOCK_TAG))?;

        CourseKey::new(org, course, run)?.make_usage_key(block_type, block_id)
    }
}

macro_rules! impl_string_serde {
    ($ty:ty, $expecting:literal) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
                s.parse()
                    .map_err(|err| serde::de::Error::custom(format_args!("{}: {err}", $expecting)))
            }
        }
    };
}

impl_string_serde!(CourseKey, "invalid course key");
impl_string_serde!(UsageKey, "invalid usage key");
