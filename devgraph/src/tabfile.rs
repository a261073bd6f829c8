use std::path::PathBuf;

/// A representation of a fstab file.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TabFile {
    pub entries: Vec<TabFileEntry>,
}

/// A representation of a single entry in a tab file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabFileEntry {
    /// Device spec: a path, a name, or a `UUID=`/`LABEL=` spec.
    pub device: String,
    pub mount_point: PathBuf,
    pub fs_type: String,
    pub options: Vec<String>,
    pub dump: u32,
    pub pass: u32,
}

impl TabFile {
    /// Parse tab file contents. Comments and lines with fewer than six
    /// fields are skipped.
    pub fn parse(contents: &str) -> Self {
        let entries = contents
            .lines()
            .filter(|line| !line.trim_start().starts_with('#'))
            .filter_map(TabFileEntry::parse)
            .collect();

        Self { entries }
    }
}

impl TabFileEntry {
    fn parse(line: &str) -> Option<Self> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 6 {
            return None;
        }

        Some(Self {
            device: fields[0].to_owned(),
            mount_point: PathBuf::from(fields[1]),
            fs_type: fields[2].to_owned(),
            options: fields[3].split(',').map(str::to_owned).collect(),
            dump: fields[4].parse().unwrap_or_default(),
            pass: fields[5].parse().unwrap_or_default(),
        })
    }
}
