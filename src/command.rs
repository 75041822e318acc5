use std::fmt;

/// Argument vector handed to the ffmpeg executable.
///
/// Tokens are passed verbatim as argv, without a shell in between.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Command {
    args: Vec<String>,
}

impl Command {
    /// Create an empty command
    pub fn new() -> Self {
        Self::default()
    }

    /// Split free-form user input into tokens.
    ///
    /// This is a plain whitespace split: quotes and escapes have no meaning,
    /// so a single argument that contains a space cannot be expressed.
    pub fn parse(input: &str) -> Self {
        Self::from_args(input.split_whitespace())
    }

    /// Build a command from already separated arguments
    pub fn from_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new().args(args)
    }

    /// Add an argument
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(|s| s.into()));
        self
    }

    /// Version query, the usual smoke test for a freshly installed binary
    pub fn version() -> Self {
        Self::new().arg("-version")
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn as_args(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.args.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_splits_on_whitespace() {
        let command = Command::parse("-i input.mp4  -vn\t-y out.wav");
        assert_eq!(command.as_args(), ["-i", "input.mp4", "-vn", "-y", "out.wav"]);
    }

    #[test]
    fn test_parse_empty_input() {
        assert!(Command::parse("").is_empty());
        assert!(Command::parse("   \t ").is_empty());
    }

    #[test]
    fn test_quotes_are_not_interpreted() {
        let command = Command::parse(r#"-i "my movie.mp4""#);
        assert_eq!(command.as_args(), ["-i", "\"my", "movie.mp4\""]);
    }

    #[test]
    fn test_builder_and_display() {
        let command = Command::version();
        assert_eq!(command.len(), 1);
        assert_eq!(command.to_string(), "-version");

        let command = Command::from_args(["-y", "-i"]).arg("a.mp4").args(vec!["-c:a", "copy"]);
        assert_eq!(command.to_string(), "-y -i a.mp4 -c:a copy");
    }
}
