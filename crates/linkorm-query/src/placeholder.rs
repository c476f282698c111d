//! Portable `?` placeholders and their rewriting into positional markers.
//!
//! Statements are authored with `?`; each clause is rewritten with one
//! running counter for the whole statement, so markers come out numbered in
//! the order they appear in the final text. `??` stands for a literal `?`.
//! Question marks inside single-quoted literals, double-quoted identifiers and
//! backtick-quoted identifiers are left alone.

use linkorm_core::Dialect;

/// Count the portable placeholders in `sql`.
pub fn count(sql: &str) -> usize {
    let mut n = 0;
    scan(sql, |piece| {
        if let Piece::Placeholder = piece {
            n += 1;
        }
    });
    n
}

/// Count the `??` escapes in `sql`.
pub fn escaped_marks(sql: &str) -> usize {
    let mut n = 0;
    scan(sql, |piece| {
        if let Piece::Char('?') = piece {
            n += 1;
        }
    });
    n
}

/// Rewrite the placeholders in `sql` for `dialect`, advancing `counter`.
///
/// MySQL markers are bare `?`, so an escaped `??` comes out looking like a
/// marker there; statements refuse to render such fragments for MySQL.
///
/// `counter` holds the number of markers already emitted by earlier clauses
/// of the same statement.
pub fn rewrite(sql: &str, dialect: Dialect, counter: &mut usize) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    scan(sql, |piece| match piece {
        Piece::Text(s) => out.push_str(s),
        Piece::Char(c) => out.push(c),
        Piece::Placeholder => {
            *counter += 1;
            out.push_str(&dialect.placeholder(*counter));
        }
    });
    out
}

enum Piece<'a> {
    Text(&'a str),
    Char(char),
    Placeholder,
}

fn scan<'a>(sql: &'a str, mut emit: impl FnMut(Piece<'a>)) {
    let mut chars = sql.char_indices().peekable();
    while let Some((start, c)) = chars.next() {
        match c {
            '\'' | '"' | '`' => {
                // Copy the quoted run verbatim; a doubled quote is an escape.
                let mut end = sql.len();
                while let Some((i, q)) = chars.next() {
                    if q == c {
                        if chars.peek().is_some_and(|&(_, next)| next == c) {
                            chars.next();
                            continue;
                        }
                        end = i + q.len_utf8();
                        break;
                    }
                }
                emit(Piece::Text(&sql[start..end]));
            }
            '?' => {
                if chars.peek().is_some_and(|&(_, next)| next == '?') {
                    chars.next();
                    emit(Piece::Char('?'));
                } else {
                    emit(Piece::Placeholder);
                }
            }
            other => emit(Piece::Char(other)),
        }
    }
}
