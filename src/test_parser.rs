use anyhow::Result;
use regex::Regex;

/// Resolves a `FILE.rb:LINE` argument to the name of the test defined at or
/// above that line, for forwarding to minitest's `-n` filter.
pub struct TestParser {
    minitest_def: Regex,
    declarative_test: Regex,
}

impl TestParser {
    pub fn new() -> Result<Self> {
        Ok(TestParser {
            minitest_def: Regex::new(r"^\s+(?:focus\s+)?def (test_\w+)")?,
            declarative_test: Regex::new(r#"^\s*test\s+(?:"(.+?)"|'(.+?)')\s*do\s*(?:#.*?)?$"#)?,
        })
    }

    /// Scan upward from `line` (1-based) for the nearest test definition.
    /// The first two lines of a file can never hold one and are skipped.
    pub fn test_name_at_line(&self, source: &str, line: usize) -> Option<String> {
        let lines: Vec<&str> = source.lines().collect();
        let end = line.min(lines.len());
        if end <= 2 {
            return None;
        }
        lines[2..end]
            .iter()
            .rev()
            .find_map(|text| self.name_from_line(text))
    }

    fn name_from_line(&self, line: &str) -> Option<String> {
        if let Some(captures) = self.minitest_def.captures(line) {
            return Some(captures[1].to_string());
        }
        let captures = self.declarative_test.captures(line)?;
        let name = captures.get(1).or_else(|| captures.get(2))?.as_str();
        Some(format!("test_{}", underscore_whitespace(name)))
    }
}

/// Collapse each run of whitespace into a single underscore, the same way
/// declarative test names become method names.
fn underscore_whitespace(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_whitespace = false;
    for ch in name.chars() {
        if ch.is_whitespace() {
            if !in_whitespace {
                out.push('_');
            }
            in_whitespace = true;
        } else {
            out.push(ch);
            in_whitespace = false;
        }
    }
    out
}

/// Split a `FILE.rb:LINE` argument into path and line number. Anything that
/// is not exactly that shape is left alone.
pub fn split_line_focus(arg: &str) -> Option<(&str, usize)> {
    let (file, line) = arg.rsplit_once(':')?;
    if !file.ends_with(".rb") || line.is_empty() || !line.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((file, line.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINITEST_SOURCE: &str = r#"require "test_helper"

class ExampleTest < Minitest::Test
  def test_that_it_has_a_version_number
    refute_nil ::Example::VERSION
  end

  def test_it_does_something_useful
    assert false
  end
end
"#;

    const FOCUSED_SOURCE: &str = r#"require "test_helper"

class FocusedTest < Minitest::Test
  focus def test_this_test_is_run
    assert true
  end
end
"#;

    const DECLARATIVE_SOURCE: &str = r#"require "test_helper"

class WidgetTest < ActiveSupport::TestCase
  test "it's important" do
    assert true
  end

  test 'it does something "interesting"' do # a comment
    assert true
  end
end
"#;

    fn parser() -> TestParser {
        TestParser::new().unwrap()
    }

    #[test]
    fn no_test_above_the_line_yields_nothing() {
        assert_eq!(parser().test_name_at_line(MINITEST_SOURCE, 3), None);
        assert_eq!(parser().test_name_at_line(MINITEST_SOURCE, 1), None);
        assert_eq!(parser().test_name_at_line("", 10), None);
    }

    #[test]
    fn finds_the_enclosing_test_method() {
        assert_eq!(
            parser().test_name_at_line(MINITEST_SOURCE, 5),
            Some("test_that_it_has_a_version_number".to_string())
        );
    }

    #[test]
    fn the_nearest_definition_above_wins() {
        assert_eq!(
            parser().test_name_at_line(MINITEST_SOURCE, 9),
            Some("test_it_does_something_useful".to_string())
        );
    }

    #[test]
    fn a_line_past_the_end_scans_the_whole_file() {
        assert_eq!(
            parser().test_name_at_line(MINITEST_SOURCE, 500),
            Some("test_it_does_something_useful".to_string())
        );
    }

    #[test]
    fn focus_prefixed_definitions_are_recognized() {
        assert_eq!(
            parser().test_name_at_line(FOCUSED_SOURCE, 5),
            Some("test_this_test_is_run".to_string())
        );
    }

    #[test]
    fn declarative_test_strings_become_method_names() {
        assert_eq!(
            parser().test_name_at_line(DECLARATIVE_SOURCE, 5),
            Some("test_it's_important".to_string())
        );
    }

    #[test]
    fn single_quoted_declarative_tests_keep_inner_quotes() {
        assert_eq!(
            parser().test_name_at_line(DECLARATIVE_SOURCE, 9),
            Some("test_it_does_something_\"interesting\"".to_string())
        );
    }

    #[test]
    fn line_focus_arguments_split_into_path_and_line() {
        assert_eq!(split_line_focus("test/a_test.rb:12"), Some(("test/a_test.rb", 12)));
        assert_eq!(split_line_focus("test/a_test.rb"), None);
        assert_eq!(split_line_focus("test/a_test.rb:"), None);
        assert_eq!(split_line_focus("test/a_test.rb:12a"), None);
        assert_eq!(split_line_focus("notes.txt:12"), None);
    }
}
