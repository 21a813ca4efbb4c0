/// Counters of what a sync did (or would do, in dry-run mode)
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub bytes_copied: u64,
    pub files_copied: u64,
    pub directories_created: u64,
    pub files_removed: u64,
    pub directories_removed: u64,
}

impl std::ops::Add for Summary {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            bytes_copied: self.bytes_copied + other.bytes_copied,
            files_copied: self.files_copied + other.files_copied,
            directories_created: self.directories_created + other.directories_created,
            files_removed: self.files_removed + other.files_removed,
            directories_removed: self.directories_removed + other.directories_removed,
        }
    }
}

impl std::ops::AddAssign for Summary {
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "bytes copied: {}", self.bytes_copied)?;
        writeln!(f, "files copied: {}", self.files_copied)?;
        writeln!(f, "directories created: {}", self.directories_created)?;
        writeln!(f, "files removed: {}", self.files_removed)?;
        writeln!(f, "directories removed: {}", self.directories_removed)?;
        Ok(())
    }
}
