/// Strip `//` and `/* */` comments from student code
///
/// String and template literals are copied untouched, so `"// not a comment"`
/// survives. Line breaks inside block comments are kept so that line numbers
/// in the stripped code still match the original.
pub fn remove_comments(code: &str) -> String {
    let mut out = String::with_capacity(code.len());
    let mut chars = code.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' | '\'' | '`' => {
                out.push(c);
                while let Some(inner) = chars.next() {
                    out.push(inner);
                    if inner == '\\' {
                        if let Some(escaped) = chars.next() {
                            out.push(escaped);
                        }
                    } else if inner == c || (inner == '\n' && c != '`') {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'/') => {
                while chars.peek().is_some_and(|next| *next != '\n') {
                    chars.next();
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut previous = '\0';
                for inner in chars.by_ref() {
                    if previous == '*' && inner == '/' {
                        break;
                    }
                    if inner == '\n' {
                        out.push('\n');
                    }
                    previous = inner;
                }
            }
            _ => out.push(c),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_comments() {
        let code = r#"
        function test() {
            // This is a single-line comment
            var str = "This is a string with a // comment inside";
            var escapedStr = "\"// Foo";
            var anotherStr = 'Another string with // not a comment.';
            /* This is a
               real multi-line comment */
            return str; // Inline comment
        }
        "#;
        let expected = [
            "",
            "        function test() {",
            "            ",
            "            var str = \"This is a string with a // comment inside\";",
            "            var escapedStr = \"\\\"// Foo\";",
            "            var anotherStr = 'Another string with // not a comment.';",
            "            ",
            "",
            "            return str; ",
            "        }",
            "        ",
        ]
        .join("\n");
        assert_eq!(remove_comments(code), expected);
    }

    #[test]
    fn test_line_count_preserved() {
        let code = "a();\n/* one\ntwo\nthree */\nb(); // done";
        let stripped = remove_comments(code);
        assert_eq!(stripped.lines().count(), code.lines().count());
        assert_eq!(stripped.lines().last(), Some("b(); "));
    }

    #[test]
    fn test_division_is_not_a_comment() {
        assert_eq!(remove_comments("x = a / b;"), "x = a / b;");
    }

    #[test]
    fn test_template_literal_kept() {
        let code = "text(`// ${score}`, 10, 10);";
        assert_eq!(remove_comments(code), code);
    }
}
