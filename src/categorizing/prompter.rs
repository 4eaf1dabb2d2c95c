use std::collections::VecDeque;
use std::io::{self, BufRead, Write};

use super::transaction::{Origin, Transaction};
use super::{CategoryPrompter, CategoryRequest, Decision, PersonMode, PromptError, Revision};

const RULE: &str = "======================================================================";
const PERSON_MODES: [&str; 2] = ["Same person for every transaction", "Choose for each transaction"];

/// Interactive prompts on a text terminal.
pub struct ConsolePrompter {
    input: Box<dyn BufRead>,
    output: Box<dyn Write>,
    listed: bool,
}

impl ConsolePrompter {
    pub fn new(input: Box<dyn BufRead>, output: Box<dyn Write>) -> ConsolePrompter {
        ConsolePrompter {
            input,
            output,
            listed: false,
        }
    }

    pub fn stdio() -> ConsolePrompter {
        ConsolePrompter::new(Box::new(io::stdin().lock()), Box::new(io::stdout()))
    }

    fn ask(&mut self, prompt: &str) -> Result<String, PromptError> {
        write!(self.output, "{}", prompt)?;
        self.output.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Err(PromptError::InputClosed);
        }

        Ok(line.trim().to_string())
    }

    fn ask_non_empty(&mut self, prompt: &str) -> Result<String, PromptError> {
        loop {
            let answer = self.ask(prompt)?;
            if !answer.is_empty() {
                return Ok(answer);
            }
            writeln!(self.output, "Input cannot be empty")?;
        }
    }

    /// Numbered menu over `options`. An empty menu picks the empty string.
    fn choose(&mut self, title: &str, options: &[String]) -> Result<String, PromptError> {
        if options.is_empty() {
            return Ok(String::new());
        }

        writeln!(self.output)?;
        writeln!(self.output, "{}", title)?;
        for (number, option) in options.iter().enumerate() {
            writeln!(self.output, "  [{}] {}", number + 1, option)?;
        }

        let prompt = format!("Choose (1-{}): ", options.len());
        loop {
            let answer = self.ask(&prompt)?;
            match answer.parse::<usize>() {
                Ok(choice) if (1..=options.len()).contains(&choice) => return Ok(options[choice - 1].clone()),
                _ => writeln!(self.output, "Enter a number between 1 and {}", options.len())?,
            }
        }
    }

    fn next_revision(&mut self, transactions: &[Transaction]) -> Result<Option<Revision>, PromptError> {
        loop {
            let answer = self.ask("Row to change (l to list, blank to finish): ")?;
            if answer.is_empty() {
                return Ok(None);
            }
            if answer.eq_ignore_ascii_case("l") {
                self.list_transactions(transactions)?;
                continue;
            }

            match answer.parse::<usize>() {
                Ok(row) if (1..=transactions.len()).contains(&row) => {
                    let category = self.ask_non_empty(&format!("New category for row {}: ", row))?;
                    return Ok(Some(Revision { row: row - 1, category }));
                },
                _ => writeln!(self.output, "Enter a row between 1 and {}", transactions.len())?,
            }
        }
    }

    fn show_transaction(&mut self, request: &CategoryRequest) -> io::Result<()> {
        let tx = request.transaction;

        writeln!(self.output)?;
        writeln!(self.output, "{}", RULE)?;
        writeln!(self.output, "Transaction {}/{}", request.position, request.total)?;
        writeln!(self.output, "Date:     {}", tx.date())?;
        match tx.kind() {
            Some(kind) => writeln!(self.output, "Amount:   {:.2} ({})", tx.amount(), kind)?,
            None => writeln!(self.output, "Amount:   {:.2}", tx.amount())?,
        }
        writeln!(self.output, "Merchant: {}", tx.description())?;
        if let Some(detail) = tx.detail() {
            writeln!(self.output, "Detail:   {}", detail)?;
        }
        writeln!(self.output, "{}", RULE)?;

        let mut number = 1;
        if !request.suggestions.is_empty() {
            writeln!(self.output, "Suggestions:")?;
            for suggestion in request.suggestions {
                writeln!(
                    self.output,
                    "  [{}] {}  <- similar to \"{}\"",
                    number, suggestion.category, suggestion.similar_to
                )?;
                number += 1;
            }
        }
        writeln!(self.output, "Categories:")?;
        for category in request.categories {
            writeln!(self.output, "  [{}] {}", number, category)?;
            number += 1;
        }
        writeln!(self.output, "  [n] new category  [s] skip  [q] quit")?;

        Ok(())
    }

    fn list_transactions(&mut self, transactions: &[Transaction]) -> io::Result<()> {
        writeln!(self.output)?;
        writeln!(self.output, "{}", RULE)?;
        writeln!(self.output, "Review")?;
        writeln!(self.output, "{}", RULE)?;
        for (row, tx) in transactions.iter().enumerate() {
            let category = tx.category().unwrap_or("-");
            let origin = match tx.origin() {
                Some(Origin::Preset) => " (input)",
                Some(Origin::TypeRule) => " (type rule)",
                Some(Origin::Rule) => " (rule)",
                Some(Origin::Corrected) => " (changed)",
                Some(Origin::Manual) | None => "",
            };
            writeln!(
                self.output,
                "  [{}] {}  {:>10.2}  {:<30}  {}{}",
                row + 1,
                tx.date(),
                tx.amount(),
                tx.display_name(),
                category,
                origin
            )?;
        }
        Ok(())
    }
}

impl CategoryPrompter for ConsolePrompter {
    fn request_category(&mut self, request: &CategoryRequest) -> Result<Decision, PromptError> {
        self.show_transaction(request)?;

        let options: Vec<String> = request
            .suggestions
            .iter()
            .map(|suggestion| suggestion.category.clone())
            .chain(request.categories.iter().cloned())
            .collect();
        let prompt = format!("Choose a category (1-{} or n/s/q): ", options.len());

        loop {
            let answer = self.ask(&prompt)?;
            match answer.to_lowercase().as_str() {
                "" => writeln!(self.output, "Please choose an option")?,
                "q" => return Ok(Decision::Quit),
                "s" => return Ok(Decision::Skip),
                "n" => return Ok(Decision::Category(self.ask_non_empty("New category name: ")?)),
                _ => match answer.parse::<usize>() {
                    Ok(choice) if (1..=options.len()).contains(&choice) => {
                        return Ok(Decision::Category(options[choice - 1].clone()));
                    },
                    Ok(_) => writeln!(self.output, "Enter a number between 1 and {}", options.len())?,
                    // Anything else is taken as the name of a new category.
                    Err(_) => return Ok(Decision::Category(answer)),
                },
            }
        }
    }

    fn request_revision(&mut self, transactions: &[Transaction]) -> Result<Option<Revision>, PromptError> {
        if transactions.is_empty() {
            return Ok(None);
        }
        if !self.listed {
            self.list_transactions(transactions)?;
            self.listed = true;
        }

        // Closing the input during review finishes it like a blank line.
        match self.next_revision(transactions) {
            Err(PromptError::InputClosed) => {
                writeln!(self.output)?;
                Ok(None)
            },
            result => result,
        }
    }

    fn select_source(&mut self, sources: &[String]) -> Result<String, PromptError> {
        self.choose("Statement source:", sources)
    }

    fn select_person_mode(&mut self, people: &[String]) -> Result<PersonMode, PromptError> {
        let modes: Vec<String> = PERSON_MODES.iter().map(|mode| mode.to_string()).collect();
        if self.choose("Attribute transactions to people:", &modes)? == modes[1] {
            return Ok(PersonMode::PerTransaction);
        }
        Ok(PersonMode::Fixed(self.choose("Person:", people)?))
    }

    fn request_person(&mut self, transaction: &Transaction, people: &[String]) -> Result<String, PromptError> {
        self.choose(&format!("Person for {}:", transaction.display_name()), people)
    }
}

/// Plays back prepared answers. Running out of decisions behaves like a
/// closed terminal.
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    decisions: VecDeque<Decision>,
    revisions: VecDeque<Revision>,
    source: Option<String>,
    person_mode: Option<PersonMode>,
    people: VecDeque<String>,
    asked: Vec<String>,
}

impl ScriptedPrompter {
    pub fn new(decisions: impl IntoIterator<Item = Decision>) -> ScriptedPrompter {
        ScriptedPrompter {
            decisions: decisions.into_iter().collect(),
            ..ScriptedPrompter::default()
        }
    }

    pub fn with_categories<S: Into<String>>(categories: impl IntoIterator<Item = S>) -> ScriptedPrompter {
        ScriptedPrompter::new(categories.into_iter().map(|category| Decision::Category(category.into())))
    }

    pub fn with_revisions(mut self, revisions: impl IntoIterator<Item = Revision>) -> ScriptedPrompter {
        self.revisions = revisions.into_iter().collect();
        self
    }

    /// Without a source the first offered one is taken.
    pub fn with_source(mut self, source: impl Into<String>) -> ScriptedPrompter {
        self.source = Some(source.into());
        self
    }

    /// Without a mode every transaction goes to the first person offered.
    pub fn with_person_mode(mut self, mode: PersonMode) -> ScriptedPrompter {
        self.person_mode = Some(mode);
        self
    }

    /// Answers for [`PersonMode::PerTransaction`], in order.
    pub fn with_people<S: Into<String>>(mut self, people: impl IntoIterator<Item = S>) -> ScriptedPrompter {
        self.people = people.into_iter().map(Into::into).collect();
        self
    }

    /// Descriptions of the transactions the user was asked about, in order.
    pub fn asked(&self) -> &[String] {
        &self.asked
    }

    pub fn remaining(&self) -> usize {
        self.decisions.len()
    }
}

impl CategoryPrompter for ScriptedPrompter {
    fn request_category(&mut self, request: &CategoryRequest) -> Result<Decision, PromptError> {
        self.asked.push(request.transaction.description().clone());
        self.decisions.pop_front().ok_or(PromptError::InputClosed)
    }

    fn request_revision(&mut self, _transactions: &[Transaction]) -> Result<Option<Revision>, PromptError> {
        Ok(self.revisions.pop_front())
    }

    fn select_source(&mut self, sources: &[String]) -> Result<String, PromptError> {
        Ok(self
            .source
            .clone()
            .or_else(|| sources.first().cloned())
            .unwrap_or_default())
    }

    fn select_person_mode(&mut self, people: &[String]) -> Result<PersonMode, PromptError> {
        Ok(self
            .person_mode
            .clone()
            .unwrap_or_else(|| PersonMode::Fixed(people.first().cloned().unwrap_or_default())))
    }

    fn request_person(&mut self, _transaction: &Transaction, _people: &[String]) -> Result<String, PromptError> {
        self.people.pop_front().ok_or(PromptError::InputClosed)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use anyhow::Result;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    use super::super::key::MerchantKey;
    use super::super::Suggestion;
    use super::*;

    fn console(input: &str) -> ConsolePrompter {
        ConsolePrompter::new(Box::new(Cursor::new(input.to_string())), Box::new(io::sink()))
    }

    fn starbucks() -> Transaction {
        Transaction::new(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(), dec!(-12.50), "Starbucks")
    }

    fn ask(prompter: &mut ConsolePrompter, suggestions: &[Suggestion]) -> Result<Decision, PromptError> {
        let tx = starbucks();
        let categories = vec!["Dining".to_string(), "Transport".to_string()];
        prompter.request_category(&CategoryRequest {
            position: 1,
            total: 1,
            transaction: &tx,
            suggestions,
            categories: &categories,
        })
    }

    #[test]
    fn test_console_numbered_choice() -> Result<()> {
        assert_eq!(ask(&mut console("2\n"), &[])?, Decision::Category("Transport".to_string()));
        Ok(())
    }

    #[test]
    fn test_console_suggestions_come_first() -> Result<()> {
        let suggestions = vec![Suggestion {
            category: "Coffee".to_string(),
            similar_to: MerchantKey::normalize("starbucks reserve").unwrap(),
        }];
        assert_eq!(ask(&mut console("1\n"), &suggestions)?, Decision::Category("Coffee".to_string()));
        assert_eq!(ask(&mut console("3\n"), &suggestions)?, Decision::Category("Transport".to_string()));
        Ok(())
    }

    #[test]
    fn test_console_commands() -> Result<()> {
        assert_eq!(ask(&mut console("s\n"), &[])?, Decision::Skip);
        assert_eq!(ask(&mut console("Q\n"), &[])?, Decision::Quit);
        assert_eq!(ask(&mut console("n\n\nCoffee\n"), &[])?, Decision::Category("Coffee".to_string()));
        Ok(())
    }

    #[test]
    fn test_console_retries_invalid_input() -> Result<()> {
        assert_eq!(ask(&mut console("\n9\n0\n1\n"), &[])?, Decision::Category("Dining".to_string()));
        Ok(())
    }

    #[test]
    fn test_console_free_text_is_new_category() -> Result<()> {
        assert_eq!(ask(&mut console("  Coffee Shops \n"), &[])?, Decision::Category("Coffee Shops".to_string()));
        Ok(())
    }

    #[test]
    fn test_console_closed_input() {
        assert!(matches!(ask(&mut console(""), &[]), Err(PromptError::InputClosed)));
    }

    #[test]
    fn test_console_revision() -> Result<()> {
        let transactions = vec![starbucks(), starbucks()];
        let mut prompter = console("5\n2\nCoffee\n\n");

        assert_eq!(
            prompter.request_revision(&transactions)?,
            Some(Revision {
                row: 1,
                category: "Coffee".to_string()
            })
        );
        assert_eq!(prompter.request_revision(&transactions)?, None);

        Ok(())
    }

    #[test]
    fn test_console_revision_ends_at_closed_input() -> Result<()> {
        let transactions = vec![starbucks()];

        assert_eq!(console("").request_revision(&transactions)?, None);
        assert_eq!(console("1\n").request_revision(&transactions)?, None);

        Ok(())
    }

    #[test]
    fn test_console_source_and_people() -> Result<()> {
        let options = vec!["Me".to_string(), "Partner".to_string()];
        let tx = starbucks();

        assert_eq!(console("0\nx\n2\n").select_source(&options)?, "Partner");
        assert_eq!(
            console("1\n2\n").select_person_mode(&options)?,
            PersonMode::Fixed("Partner".to_string())
        );
        assert_eq!(console("2\n").select_person_mode(&options)?, PersonMode::PerTransaction);
        assert_eq!(console("1\n").request_person(&tx, &options)?, "Me");
        assert!(matches!(console("").request_person(&tx, &options), Err(PromptError::InputClosed)));

        Ok(())
    }

    #[test]
    fn test_scripted_runs_out() -> Result<()> {
        let mut prompter = ScriptedPrompter::with_categories(["Dining"]);
        let tx = starbucks();
        let request = CategoryRequest {
            position: 1,
            total: 1,
            transaction: &tx,
            suggestions: &[],
            categories: &[],
        };

        assert_eq!(prompter.request_category(&request)?, Decision::Category("Dining".to_string()));
        assert!(matches!(prompter.request_category(&request), Err(PromptError::InputClosed)));
        assert_eq!(prompter.asked(), ["Starbucks".to_string(), "Starbucks".to_string()]);

        Ok(())
    }

    #[test]
    fn test_scripted_defaults_to_first_option() -> Result<()> {
        let options = vec!["WeChat".to_string(), "Bank".to_string()];
        let mut prompter = ScriptedPrompter::default();

        assert_eq!(prompter.select_source(&options)?, "WeChat");
        assert_eq!(prompter.select_person_mode(&options)?, PersonMode::Fixed("WeChat".to_string()));
        assert!(matches!(
            prompter.request_person(&starbucks(), &options),
            Err(PromptError::InputClosed)
        ));

        Ok(())
    }
}
