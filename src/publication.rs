use std::fmt;

/// Literature reference for a method used during reconstruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Publication {
    pub authors: Vec<String>,
    pub title  : String,
    pub journal: String,
    pub year   : u16,
    pub volume : u32,
    pub issue  : u32,
    pub pages  : String,
    pub doi    : String,
}

impl Publication {
    #[allow(clippy::too_many_arguments)]
    pub fn new(authors: &[&str], title: &str, journal: &str, year: u16,
               volume: u32, issue: u32, pages: &str, doi: &str) -> Self {
        Self {
            authors: authors.iter().map(|a| a.to_string()).collect(),
            title  : title.into(),
            journal: journal.into(),
            year, volume, issue,
            pages  : pages.into(),
            doi    : doi.into(),
        }
    }
}

impl fmt::Display for Publication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let authors = match self.authors.as_slice() {
            [] => String::new(),
            [one] => one.clone(),
            [init @ .., last] => format!("{} and {last}", init.join(", ")),
        };
        write!(f, "{authors}, {}, {}, {}({}):{}, {}", self.title, self.journal,
               self.volume, self.issue, self.pages, self.year)?;
        if !self.doi.is_empty() { write!(f, ", doi:{}", self.doi)? }
        Ok(())
    }
}
