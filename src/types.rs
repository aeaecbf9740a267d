use std::fmt;

/// The account the daemon should run as after dropping privileges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum User {
    Id(u32),
    Name(String),
}

/// The primary group the daemon should run as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Group {
    Id(u32),
    Name(String),
}

impl From<u32> for User {
    fn from(id: u32) -> Self {
        User::Id(id)
    }
}
impl From<&str> for User {
    fn from(s: &str) -> Self {
        User::Name(s.to_owned())
    }
}
impl From<String> for User {
    fn from(s: String) -> Self {
        User::Name(s)
    }
}

impl From<u32> for Group {
    fn from(id: u32) -> Self {
        Group::Id(id)
    }
}
impl From<&str> for Group {
    fn from(s: &str) -> Self {
        Group::Name(s.to_owned())
    }
}
impl From<String> for Group {
    fn from(s: String) -> Self {
        Group::Name(s)
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            User::Id(id) => write!(f, "uid {}", id),
            User::Name(name) => f.write_str(name),
        }
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Group::Id(id) => write!(f, "gid {}", id),
            Group::Name(name) => f.write_str(name),
        }
    }
}
