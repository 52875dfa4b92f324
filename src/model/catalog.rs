/// Token type ids the palette offers. Icons and colors live with the UI.
pub const TOKEN_TYPES: &[(&str, TokenCategory)] = &[
    ("warrior", TokenCategory::Characters),
    ("mage", TokenCategory::Characters),
    ("rogue", TokenCategory::Characters),
    ("bard", TokenCategory::Characters),
    ("paladin", TokenCategory::Characters),
    ("goblin", TokenCategory::Monsters),
    ("orc", TokenCategory::Monsters),
    ("dragon", TokenCategory::Monsters),
    ("skeleton", TokenCategory::Monsters),
    ("chest", TokenCategory::Objects),
    ("potion", TokenCategory::Objects),
    ("torch", TokenCategory::Objects),
    ("key", TokenCategory::Objects),
    ("trap", TokenCategory::Dungeon),
    ("wall", TokenCategory::Dungeon),
    ("door", TokenCategory::Dungeon),
    ("floor", TokenCategory::Dungeon),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenCategory {
    Characters,
    Monsters,
    Objects,
    Dungeon,
}

pub fn is_known_token(token_type_id: &str) -> bool {
    category_of(token_type_id).is_some()
}

pub fn category_of(token_type_id: &str) -> Option<TokenCategory> {
    TOKEN_TYPES
        .iter()
        .find(|(id, _)| *id == token_type_id)
        .map(|(_, category)| *category)
}
