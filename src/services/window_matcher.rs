use crate::events::{AxWindow, AxWindowRef};
use std::collections::HashSet;
use std::fmt;

/// Каким проходом найдено окно
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// Заголовок совпал полностью
    Exact,
    /// Точного совпадения нет, выбрано окно с самым длинным заголовком
    BestEffort,
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchKind::Exact => write!(f, "точное"),
            MatchKind::BestEffort => write!(f, "приблизительное"),
        }
    }
}

/// Подобрать живое окно под сохранённый заголовок.
///
/// Окна из `claimed` уже заняты другими дескрипторами той же раскладки и не
/// рассматриваются. Сначала ищется точное совпадение (пустой с пустым тоже
/// совпадает), затем самое длинное название; при равенстве выигрывает первое по порядку.
pub fn match_window<'a>(
    title: &str,
    candidates: &'a [AxWindow],
    claimed: &HashSet<AxWindowRef>,
) -> Option<(&'a AxWindow, MatchKind)> {
    let free = || candidates.iter().filter(move |w| !claimed.contains(&w.handle));

    if let Some(window) = free().find(|w| w.title == title) {
        return Some((window, MatchKind::Exact));
    }

    let mut best: Option<&AxWindow> = None;
    for window in free() {
        let score = window.title.chars().count();
        if best.map_or(true, |b| score > b.title.chars().count()) {
            best = Some(window);
        }
    }
    best.map(|w| (w, MatchKind::BestEffort))
}
