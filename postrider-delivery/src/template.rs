//! Placeholder expansion for subject and body text.
//!
//! Supported placeholders, in single or double braces:
//!
//! | Placeholder | Replaced with                |
//! |-------------|------------------------------|
//! | `{email}`   | the recipient address        |
//! | `{date}`    | current date, `YYYY-MM-DD`   |
//! | `{time}`    | current time, `HH:MM:SS`     |
//! | `{random}`  | an 8 character random string |

use rand::{Rng, distr::Alphanumeric};

pub(crate) fn expand(text: &str, recipient: &str) -> String {
    if !text.contains('{') {
        return text.to_string();
    }

    let now = chrono::Local::now();
    let date = now.format("%Y-%m-%d").to_string();
    let time = now.format("%H:%M:%S").to_string();
    let token = random_token();

    // Double-brace spellings first so "{{email}}" never leaves stray braces.
    text.replace("{{email}}", recipient)
        .replace("{email}", recipient)
        .replace("{{date}}", &date)
        .replace("{date}", &date)
        .replace("{{time}}", &time)
        .replace("{time}", &time)
        .replace("{{random}}", &token)
        .replace("{random}", &token)
}

fn random_token() -> String {
    let mut rng = rand::rng();

    (0..8).map(|_| rng.sample(Alphanumeric) as char).collect()
}
