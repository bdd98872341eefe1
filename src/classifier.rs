//! File extension histogram over blob names.

/// Extensions tracked when none are configured.
pub const DEFAULT_EXTENSIONS: &[&str] = &["txt", "csv", "pdf", "docx", "xlsx"];

/// Legacy suffixes folded into their modern bucket.
const LEGACY_ALIASES: &[(&str, &str)] = &[("doc", "docx"), ("xls", "xlsx")];

/// Per-extension counts in configured order, plus everything unmatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionHistogram {
    counts: Vec<(String, usize)>,
    other: usize,
}

impl ExtensionHistogram {
    fn empty(extensions: &[String]) -> Self {
        Self {
            counts: extensions.iter().map(|e| (e.clone(), 0)).collect(),
            other: 0,
        }
    }

    /// Count for a tracked extension; `None` if it is not tracked.
    pub fn count(&self, extension: &str) -> Option<usize> {
        self.counts
            .iter()
            .find(|(ext, _)| ext == extension)
            .map(|(_, n)| *n)
    }

    pub fn other(&self) -> usize {
        self.other
    }

    /// Tracked counts in configured order.
    pub fn counts(&self) -> impl Iterator<Item = usize> + '_ {
        self.counts.iter().map(|(_, n)| *n)
    }

    pub fn total(&self) -> usize {
        self.counts().sum::<usize>() + self.other
    }

    fn bump(&mut self, idx: Option<usize>) {
        match idx {
            Some(i) => self.counts[i].1 += 1,
            None => self.other += 1,
        }
    }
}

/// Buckets names by case-sensitive suffix; first match in order wins.
#[derive(Debug, Clone)]
pub struct ExtensionClassifier {
    extensions: Vec<String>,
}

impl ExtensionClassifier {
    pub fn new(extensions: Vec<String>) -> Self {
        Self { extensions }
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn classify<I, S>(&self, names: I) -> ExtensionHistogram
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut histogram = ExtensionHistogram::empty(&self.extensions);
        for name in names {
            histogram.bump(self.bucket_of(name.as_ref()));
        }
        histogram
    }

    fn bucket_of(&self, name: &str) -> Option<usize> {
        if let Some(i) = self.extensions.iter().position(|e| name.ends_with(e.as_str())) {
            return Some(i);
        }

        LEGACY_ALIASES
            .iter()
            .find(|(legacy, _)| name.ends_with(legacy))
            .and_then(|(_, canonical)| self.extensions.iter().position(|e| e == canonical))
    }
}

impl Default for ExtensionClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_sum_to_input_length() {
        let classifier = ExtensionClassifier::default();
        let names = [
            "a.txt", "b.csv", "c.pdf", "d.docx", "e.xlsx", "f.doc", "g.xls", "h.bin", "noext", "",
        ];
        let histogram = classifier.classify(names);
        assert_eq!(histogram.total(), names.len());
    }

    #[test]
    fn test_canonical_extensions_never_other() {
        let classifier = ExtensionClassifier::default();
        let histogram = classifier.classify(["report.docx", "sheet.xlsx"]);
        assert_eq!(histogram.count("docx"), Some(1));
        assert_eq!(histogram.count("xlsx"), Some(1));
        assert_eq!(histogram.other(), 0);
    }

    #[test]
    fn test_legacy_suffixes_fold_into_canonical() {
        let classifier = ExtensionClassifier::default();
        let histogram = classifier.classify(["old.doc", "old.xls", "new.docx"]);
        assert_eq!(histogram.count("docx"), Some(2));
        assert_eq!(histogram.count("xlsx"), Some(1));
        assert_eq!(histogram.other(), 0);
    }

    #[test]
    fn test_legacy_suffix_without_canonical_bucket_is_other() {
        let classifier = ExtensionClassifier::new(vec!["txt".to_string()]);
        let histogram = classifier.classify(["old.doc", "notes.txt"]);
        assert_eq!(histogram.count("txt"), Some(1));
        assert_eq!(histogram.other(), 1);
    }

    #[test]
    fn test_matching_is_case_sensitive() {
        let classifier = ExtensionClassifier::default();
        let histogram = classifier.classify(["SHOUT.TXT", "quiet.txt"]);
        assert_eq!(histogram.count("txt"), Some(1));
        assert_eq!(histogram.other(), 1);
    }

    #[test]
    fn test_first_configured_match_wins() {
        let classifier = ExtensionClassifier::new(vec!["gz".to_string(), "tar.gz".to_string()]);
        let histogram = classifier.classify(["bundle.tar.gz"]);
        assert_eq!(histogram.count("gz"), Some(1));
        assert_eq!(histogram.count("tar.gz"), Some(0));
        assert_eq!(histogram.total(), 1);
    }

    #[test]
    fn test_untracked_extension_returns_none() {
        let histogram = ExtensionClassifier::default().classify(Vec::<String>::new());
        assert_eq!(histogram.count("png"), None);
        assert_eq!(histogram.counts().collect::<Vec<_>>(), vec![0, 0, 0, 0, 0]);
        assert_eq!(histogram.total(), 0);
    }
}
