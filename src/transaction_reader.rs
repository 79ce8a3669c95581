use std::fs::File;
use std::io::{BufRead, BufReader};

// Reads a transaction database: one transaction per line, whitespace
// separated decimal item IDs. Transactions are returned sorted with
// duplicate items collapsed, so downstream support counting can treat
// every occurrence as distinct.
pub struct TransactionReader {
    reader: BufReader<File>,
    path: String,
    line_number: usize,
}

impl TransactionReader {
    pub fn new(path: &str) -> Result<TransactionReader, String> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) => return Err(format!("Cannot open {}: {}", path, e)),
        };
        Ok(TransactionReader {
            reader: BufReader::new(file),
            path: path.to_owned(),
            line_number: 0,
        })
    }

    // Loads the whole database up front; mining never touches the disk
    // once it starts.
    pub fn read_all(path: &str) -> Result<Vec<Vec<u32>>, String> {
        let reader = TransactionReader::new(path)?;
        let mut transactions = Vec::new();
        for transaction in reader {
            transactions.push(transaction?);
        }
        Ok(transactions)
    }
}

impl Iterator for TransactionReader {
    type Item = Result<Vec<u32>, String>;

    fn next(&mut self) -> Option<Result<Vec<u32>, String>> {
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) => return None,
            Ok(_) => {}
            Err(e) => return Some(Err(format!("Read error in {}: {}", self.path, e))),
        }
        self.line_number += 1;

        let mut transaction: Vec<u32> = Vec::new();
        for token in line.split_whitespace() {
            match token.parse::<u32>() {
                Ok(item) => transaction.push(item),
                Err(_) => {
                    return Some(Err(format!(
                        "{}:{}: malformed item '{}'",
                        self.path, self.line_number, token
                    )))
                }
            }
        }
        transaction.sort_unstable();
        transaction.dedup();
        Some(Ok(transaction))
    }
}

#[cfg(test)]
mod tests {
    use super::TransactionReader;
    use std::env;
    use std::fs::File;
    use std::io::Write;

    fn write_temp(name: &str, content: &str) -> String {
        let mut path = env::temp_dir();
        path.push(name);
        let path = path.to_str().unwrap().to_owned();
        let mut file = File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_reads_sorted_deduped() {
        let path = write_temp("lcm_reader_ok.dat", "3 1 2 2\n\n5 4\n");
        let transactions = TransactionReader::read_all(&path).unwrap();
        assert_eq!(transactions, vec![vec![1, 2, 3], vec![], vec![4, 5]]);
    }

    #[test]
    fn test_malformed_token_is_fatal() {
        let path = write_temp("lcm_reader_bad.dat", "1 2\n3 x 4\n");
        let result = TransactionReader::read_all(&path);
        assert!(result.is_err());
        let message = result.unwrap_err();
        assert!(message.contains(":2:"));
        assert!(message.contains("'x'"));
    }
}
