use std::{fmt, hash::Hash};

/// Имя события: сравнимый идентификатор одного вида событий в схеме.
///
/// Реализуется автоматически для любого подходящего типа. В типичном
/// использовании это field-less enum, объявленный рядом со схемой событий,
/// либо `&'static str` в простых случаях.
pub trait EventName: Clone + Eq + Hash + fmt::Debug + Send + 'static {}

impl<T: Clone + Eq + Hash + fmt::Debug + Send + 'static> EventName for T {}

/// Полезная нагрузка события.
///
/// Клонируется по одному разу на каждого pull-потребителя; синхронные
/// слушатели получают её по ссылке.
pub trait EventPayload: Clone + Send + 'static {}

impl<T: Clone + Send + 'static> EventPayload for T {}

/// Пара «имя + нагрузка». Элемент глобальной pull-последовательности.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event<N, P> {
    pub name: N,
    pub payload: P,
}

impl<N, P> Event<N, P> {
    pub fn new(name: N, payload: P) -> Self {
        Self { name, payload }
    }
}
