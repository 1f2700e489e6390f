use crate::ast::*;
use crate::lexer::{LexError, Lexer, Token};

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Lex error: {0}")]
    Lex(#[from] LexError),
    #[error("Unexpected token: {0:?}, expected {1}")]
    Unexpected(Token, &'static str),
    #[error("Unknown action: {0}")]
    UnknownAction(String),
    #[error("Duplicate {0}: {1}")]
    Duplicate(&'static str, String),
    #[error("Invalid value for @{0}")]
    InvalidSetting(String),
    #[error("Field {0} cannot be both computed and a relation")]
    ComputedRelation(String),
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(input: &str) -> Result<Self, ParseError> {
        let tokens = Lexer::new(input).tokenize()?;
        Ok(Self { tokens, pos: 0 })
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> &Token {
        let tok = self.tokens.get(self.pos).unwrap_or(&Token::Eof);
        self.pos += 1;
        tok
    }

    fn expect_ident(&mut self) -> Result<String, ParseError> {
        match self.advance().clone() {
            Token::Ident(s) => Ok(s),
            tok => Err(ParseError::Unexpected(tok, "identifier")),
        }
    }

    fn expect_str(&mut self) -> Result<String, ParseError> {
        match self.advance().clone() {
            Token::Str(s) => Ok(s),
            tok => Err(ParseError::Unexpected(tok, "string")),
        }
    }

    fn expect(&mut self, expected: Token, what: &'static str) -> Result<(), ParseError> {
        let tok = self.advance().clone();
        if tok == expected {
            Ok(())
        } else {
            Err(ParseError::Unexpected(tok, what))
        }
    }

    fn check_ident(&self, name: &str) -> bool {
        matches!(self.peek(), Token::Ident(s) if s == name)
    }

    pub fn parse(&mut self) -> Result<Schema, ParseError> {
        let mut schema = Schema::default();

        while *self.peek() != Token::Eof {
            if self.check_ident("table") {
                self.advance();
                let (name, table) = self.parse_table()?;
                if schema.tables.contains_key(&name) {
                    return Err(ParseError::Duplicate("table", name));
                }
                schema.tables.insert(name, table);
            } else if self.check_ident("role") {
                self.advance();
                let (name, role) = self.parse_role()?;
                if schema.roles.contains_key(&name) {
                    return Err(ParseError::Duplicate("role", name));
                }
                schema.roles.insert(name, role);
            } else if self.check_ident("common") {
                self.advance();
                self.expect(Token::LBrace, "{")?;
                while *self.peek() != Token::RBrace {
                    let (name, field) = self.parse_field()?;
                    schema.common_fields.insert(name, field);
                }
                self.expect(Token::RBrace, "}")?;
            } else {
                return Err(ParseError::Unexpected(
                    self.peek().clone(),
                    "table, role, or common",
                ));
            }
        }

        Ok(schema)
    }

    /// role editor inherits reader, author : "Edits articles"
    fn parse_role(&mut self) -> Result<(String, RoleConfig), ParseError> {
        let name = self.expect_ident()?;
        let mut role = RoleConfig::default();

        if self.check_ident("inherits") {
            self.advance();
            role.inherits = self.parse_ident_list()?;
        }

        if *self.peek() == Token::Colon {
            self.advance();
            role.description = Some(self.expect_str()?);
        }

        Ok((name, role))
    }

    fn parse_table(&mut self) -> Result<(String, TableConfig), ParseError> {
        let name = self.expect_ident()?;
        self.expect(Token::LBrace, "{")?;

        let mut table = TableConfig::default();

        while *self.peek() != Token::RBrace {
            if *self.peek() == Token::At {
                self.parse_setting(&mut table)?;
            } else {
                let (field_name, field) = self.parse_field()?;
                if table.fields.contains_key(&field_name) {
                    return Err(ParseError::Duplicate("field", format!("{name}.{field_name}")));
                }
                table.fields.insert(field_name, field);
            }
        }

        self.expect(Token::RBrace, "}")?;
        Ok((name, table))
    }

    /// Table-level settings use the `@key = value` form; unknown keys are kept as hints.
    fn parse_setting(&mut self, table: &mut TableConfig) -> Result<(), ParseError> {
        self.expect(Token::At, "@")?;
        let mut key = self.expect_ident()?;

        while *self.peek() == Token::Dot {
            self.advance();
            key.push('.');
            key.push_str(&self.expect_ident()?);
        }

        self.expect(Token::Eq, "=")?;

        if key == "sort" {
            table.default_sort = Some(self.parse_sort_spec()?);
            return Ok(());
        }

        if let Some(role) = key.strip_prefix("grant.") {
            let actions = self.parse_action_list()?;
            table.grant.add(role, actions);
            return Ok(());
        }

        let value = self.parse_hint_value()?;
        match key.as_str() {
            "display" => table.display_fields = value.names(),
            "search" => table.search_fields = value.names(),
            "page" => match value {
                HintValue::Int(n) if n > 0 => table.page_size = Some(n as usize),
                _ => return Err(ParseError::InvalidSetting(key.clone())),
            },
            "attachments" => {
                table.attachments = matches!(value, HintValue::Ident(ref s) if s == "true")
            }
            "calendar" => table.calendar = value.names().into_iter().next(),
            _ => table.hints.push(Hint {
                key: key.clone(),
                value,
            }),
        }

        Ok(())
    }

    fn parse_hint_value(&mut self) -> Result<HintValue, ParseError> {
        match self.advance().clone() {
            Token::Num(n) => Ok(HintValue::Int(n)),
            Token::Str(s) => Ok(HintValue::Str(s)),
            Token::Ident(first) => {
                if *self.peek() != Token::Comma {
                    return Ok(HintValue::Ident(first));
                }
                let mut items = vec![first];
                while *self.peek() == Token::Comma {
                    self.advance();
                    items.push(self.expect_ident()?);
                }
                Ok(HintValue::List(items))
            }
            Token::LBracket => {
                let items = if *self.peek() == Token::RBracket {
                    Vec::new()
                } else {
                    self.parse_ident_list()?
                };
                self.expect(Token::RBracket, "]")?;
                Ok(HintValue::List(items))
            }
            tok => Err(ParseError::Unexpected(tok, "setting value")),
        }
    }

    fn parse_sort_spec(&mut self) -> Result<SortSpec, ParseError> {
        let field = self.expect_ident()?;
        let mut order = SortOrder::Asc;
        if let Token::Ident(s) = self.peek() {
            if let Some(o) = SortOrder::from_str(s) {
                order = o;
                self.advance();
            }
        }
        Ok(SortSpec { field, order })
    }

    fn parse_action(&mut self) -> Result<Action, ParseError> {
        let name = self.expect_ident()?;
        Action::from_str(&name).ok_or(ParseError::UnknownAction(name))
    }

    /// `read, create, update`
    fn parse_action_list(&mut self) -> Result<Vec<Action>, ParseError> {
        let mut actions = vec![self.parse_action()?];
        while *self.peek() == Token::Comma {
            self.advance();
            actions.push(self.parse_action()?);
        }
        Ok(actions)
    }

    fn parse_field(&mut self) -> Result<(String, FieldConfig), ParseError> {
        let name = self.expect_ident()?;
        let typ = FieldType::from_str(&self.expect_ident()?);
        let mut field = FieldConfig::new(typ);
        let mut relation: Option<RelationConfig> = None;

        loop {
            if self.check_ident("pk") {
                self.advance();
                field.is_primary = true;
            } else if self.check_ident("auto") {
                self.advance();
                field.auto_increment = true;
            } else if self.check_ident("default") {
                self.advance();
                field.default = Some(self.parse_literal()?);
            } else if self.check_ident("renderer") {
                self.advance();
                field.renderer = Some(self.expect_ident()?);
            } else if self.check_ident("values") {
                self.advance();
                self.expect(Token::LParen, "(")?;
                while *self.peek() != Token::RParen {
                    match self.parse_literal()? {
                        Literal::Str(s) => field.values.push(s),
                        Literal::Int(n) => field.values.push(n.to_string()),
                    }
                    if *self.peek() == Token::Comma {
                        self.advance();
                    }
                }
                self.expect(Token::RParen, ")")?;
            } else if self.check_ident("as") {
                self.advance();
                field.computed = Some(Computed::As(self.expect_str()?));
            } else if self.check_ident("calc") {
                self.advance();
                field.computed = Some(Computed::Calculate(self.expect_str()?));
            } else if self.check_ident("grant") {
                self.advance();
                field.grant = Some(self.parse_field_grant()?);
            } else if *self.peek() == Token::Arrow {
                self.advance();
                let related_table = self.expect_ident()?;
                let mut foreign_key = "id".to_string();
                if *self.peek() == Token::Dot {
                    self.advance();
                    foreign_key = self.expect_ident()?;
                }
                relation = Some(RelationConfig {
                    related_table,
                    foreign_key,
                    array_name: None,
                    relationship_strength: Strength::default(),
                    default_sort: None,
                });
            } else if let Some(rel) = relation.as_mut().filter(|_| self.is_relation_modifier()) {
                match self.advance().clone() {
                    Token::Ident(m) if m == "array" => rel.array_name = Some(self.expect_ident()?),
                    Token::Ident(m) if m == "strong" => rel.relationship_strength = Strength::Strong,
                    Token::Ident(m) if m == "weak" => rel.relationship_strength = Strength::Weak,
                    _ => rel.default_sort = Some(self.parse_sort_spec()?),
                }
            } else {
                break;
            }
        }

        if relation.is_some() && field.computed.is_some() {
            return Err(ParseError::ComputedRelation(name));
        }
        field.relation = relation;

        Ok((name, field))
    }

    fn is_relation_modifier(&self) -> bool {
        ["array", "strong", "weak", "sort"]
            .iter()
            .any(|m| self.check_ident(m))
    }

    /// grant(editor: read update, admin: read)
    fn parse_field_grant(&mut self) -> Result<Grant, ParseError> {
        self.expect(Token::LParen, "(")?;
        let mut grant = Grant::default();

        while *self.peek() != Token::RParen {
            let role = self.expect_ident()?;
            self.expect(Token::Colon, ":")?;
            let mut actions = vec![self.parse_action()?];
            while matches!(self.peek(), Token::Ident(_)) {
                actions.push(self.parse_action()?);
            }
            grant.add(&role, actions);
            if *self.peek() == Token::Comma {
                self.advance();
            }
        }

        self.expect(Token::RParen, ")")?;
        Ok(grant)
    }

    fn parse_literal(&mut self) -> Result<Literal, ParseError> {
        match self.advance().clone() {
            Token::Num(n) => Ok(Literal::Int(n)),
            Token::Str(s) => Ok(Literal::Str(s)),
            Token::Ident(s) => Ok(Literal::Str(s)),
            tok => Err(ParseError::Unexpected(tok, "literal")),
        }
    }

    fn parse_ident_list(&mut self) -> Result<Vec<String>, ParseError> {
        let mut list = vec![self.expect_ident()?];
        while *self.peek() == Token::Comma {
            self.advance();
            list.push(self.expect_ident()?);
        }
        Ok(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roles() {
        let input = r#"
            role public : "Anyone"
            role editor inherits reader, author : "Edits articles"
        "#;
        let schema = Parser::new(input).unwrap().parse().unwrap();
        assert_eq!(schema.roles.len(), 2);
        assert!(schema.roles["public"].inherits.is_empty());
        assert_eq!(schema.roles["editor"].inherits, vec!["reader", "author"]);
        assert_eq!(schema.roles["editor"].description.as_deref(), Some("Edits articles"));
    }

    #[test]
    fn test_parse_table_settings() {
        let input = r#"
            table Article {
                @display = title, subtitle
                @search = [title, body]
                @page = 25
                @sort = createdAt desc
                @grant.editor = read, create, update
                @grant.public = read
                @attachments = true
                @calendar = publishedOn
                @hint.color = "blue"

                title text
            }
        "#;
        let schema = Parser::new(input).unwrap().parse().unwrap();
        let table = &schema.tables["Article"];
        assert_eq!(table.display_fields, vec!["title", "subtitle"]);
        assert_eq!(table.search_fields, vec!["title", "body"]);
        assert_eq!(table.page_size, Some(25));
        assert_eq!(
            table.default_sort,
            Some(SortSpec {
                field: "createdAt".into(),
                order: SortOrder::Desc
            })
        );
        assert_eq!(
            table.grant.0["editor"],
            vec![Action::Read, Action::Create, Action::Update]
        );
        assert_eq!(table.grant.0["public"], vec![Action::Read]);
        assert!(table.attachments);
        assert_eq!(table.calendar.as_deref(), Some("publishedOn"));
        assert_eq!(table.hints[0].key, "hint.color");
    }

    #[test]
    fn test_parse_field_modifiers() {
        let input = r#"
            table Article {
                id int pk auto
                status enum values("draft", "live") default "draft"
                cover text renderer image
                fullTitle text as "title || subtitle"
                notes text grant(editor: read update, admin: read)
            }
        "#;
        let schema = Parser::new(input).unwrap().parse().unwrap();
        let fields = &schema.tables["Article"].fields;

        assert!(fields["id"].is_primary && fields["id"].auto_increment);
        assert_eq!(fields["status"].typ, FieldType::Enum);
        assert_eq!(fields["status"].values, vec!["draft", "live"]);
        assert_eq!(fields["status"].default, Some(Literal::Str("draft".into())));
        assert_eq!(fields["cover"].renderer.as_deref(), Some("image"));
        assert!(!fields["fullTitle"].is_stored());

        let grant = fields["notes"].grant.as_ref().unwrap();
        assert_eq!(grant.0["editor"], vec![Action::Read, Action::Update]);
        assert_eq!(grant.0["admin"], vec![Action::Read]);
    }

    #[test]
    fn test_parse_relation() {
        let input = r#"
            table Comment {
                onArticle int -> Article array comments strong sort createdAt desc
                byAuthor int -> Author.uid
                body text
            }
        "#;
        let schema = Parser::new(input).unwrap().parse().unwrap();
        let fields = &schema.tables["Comment"].fields;

        let rel = fields["onArticle"].relation.as_ref().unwrap();
        assert_eq!(rel.related_table, "Article");
        assert_eq!(rel.foreign_key, "id");
        assert_eq!(rel.array_name.as_deref(), Some("comments"));
        assert_eq!(rel.relationship_strength, Strength::Strong);
        assert_eq!(rel.default_sort.as_ref().unwrap().order, SortOrder::Desc);

        let rel = fields["byAuthor"].relation.as_ref().unwrap();
        assert_eq!(rel.foreign_key, "uid");
        assert_eq!(rel.relationship_strength, Strength::Weak);
        assert!(fields["body"].relation.is_none());
    }

    #[test]
    fn test_parse_common_fields() {
        let input = r#"
            common {
                tags text
            }
            table A { name text }
        "#;
        let schema = Parser::new(input).unwrap().parse().unwrap();
        assert!(schema.common_fields.contains_key("tags"));
    }

    #[test]
    fn test_unknown_action_rejected() {
        let input = "table A { @grant.editor = read, fly }";
        let err = Parser::new(input).unwrap().parse().unwrap_err();
        assert!(matches!(err, ParseError::UnknownAction(a) if a == "fly"));
    }

    #[test]
    fn test_duplicate_table_rejected() {
        let input = "table A { } table A { }";
        let err = Parser::new(input).unwrap().parse().unwrap_err();
        assert!(matches!(err, ParseError::Duplicate("table", _)));
    }
}
