use crate::recipient::Recipient;

pub const VALUE_ONE_TOKEN: &str = "@valueOne";
pub const VALUE_TWO_TOKEN: &str = "@valueTwo";

/// Literal replace-all of both placeholders; empty fields substitute as "".
pub fn render(template: &str, recipient: &Recipient) -> String {
    template
        .replace(VALUE_ONE_TOKEN, &recipient.value_one)
        .replace(VALUE_TWO_TOKEN, &recipient.value_two)
}
