use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;

use crate::{
    error::LimitExceeded,
    event::{EventName, EventPayload},
};

/// Токен регистрации слушателя.
///
/// В Rust у замыканий нет стабильной идентичности по ссылке, поэтому
/// каждая регистрация возвращает непрозрачный токен, а снятие слушателя
/// принимает токен. Две регистрации одного и того же замыкания получают
/// разные токены и снимаются независимо.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

impl fmt::Debug for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ListenerId({})", self.0)
    }
}

pub(crate) type Callback<P> = Box<dyn FnMut(&P) + Send>;
pub(crate) type GlobalCallback<N, P> = Box<dyn FnMut(&N, &P) + Send>;

/// Запись слушателя одного имени события.
///
/// Хранится в `Arc`, чтобы снимок диспетчера и живой реестр работали
/// с одной и той же аллокацией: снятие после one-shot вызова удаляет
/// ровно ту запись, которая была вызвана.
pub(crate) struct ListenerEntry<P> {
    pub(crate) id: ListenerId,
    pub(crate) once: bool,
    /// Занято ли право на единственный вызов (только для `once`).
    fired: AtomicBool,
    pub(crate) callback: Mutex<Callback<P>>,
}

/// Запись глобального слушателя (получает имя вместе с нагрузкой).
pub(crate) struct GlobalListenerEntry<N, P> {
    pub(crate) id: ListenerId,
    pub(crate) once: bool,
    fired: AtomicBool,
    pub(crate) callback: Mutex<GlobalCallback<N, P>>,
}

impl<P> ListenerEntry<P> {
    fn new(id: ListenerId, once: bool, callback: Callback<P>) -> Arc<Self> {
        Arc::new(Self {
            id,
            once,
            fired: AtomicBool::new(false),
            callback: Mutex::new(callback),
        })
    }

    /// Занимает право на вызов. Для обычного слушателя всегда `true`;
    /// для one-shot — `true` ровно один раз за время жизни записи,
    /// даже при конкурентных проходах диспетчера.
    pub(crate) fn claim(&self) -> bool {
        !self.once || !self.fired.swap(true, Ordering::AcqRel)
    }
}

impl<N, P> GlobalListenerEntry<N, P> {
    fn new(id: ListenerId, once: bool, callback: GlobalCallback<N, P>) -> Arc<Self> {
        Arc::new(Self {
            id,
            once,
            fired: AtomicBool::new(false),
            callback: Mutex::new(callback),
        })
    }

    pub(crate) fn claim(&self) -> bool {
        !self.once || !self.fired.swap(true, Ordering::AcqRel)
    }
}

/// Реестр синхронных слушателей.
///
/// Хранит упорядоченные списки записей по имени события плюс отдельный
/// список глобальных слушателей. Порядок вставки определяет порядок
/// вызова при диспетчеризации. Сам реестр никогда не вызывает callbacks,
/// только мутирует списки.
pub(crate) struct ListenerSet<N, P> {
    by_name: HashMap<N, Vec<Arc<ListenerEntry<P>>>>,
    global: Vec<Arc<GlobalListenerEntry<N, P>>>,
}

impl<N: EventName, P: EventPayload> ListenerSet<N, P> {
    pub(crate) fn new() -> Self {
        Self {
            by_name: HashMap::new(),
            global: Vec::new(),
        }
    }

    /// Добавляет слушателя в конец списка имени `name`.
    ///
    /// При ненулевом `limit` регистрация отклоняется, если список уже
    /// достиг лимита; состояние при отказе не меняется.
    pub(crate) fn register(
        &mut self,
        name: N,
        callback: Callback<P>,
        once: bool,
        id: ListenerId,
        limit: usize,
    ) -> Result<(), LimitExceeded> {
        if limit != 0 && self.by_name.get(&name).map_or(0, Vec::len) >= limit {
            return Err(LimitExceeded { limit });
        }
        self.by_name
            .entry(name)
            .or_default()
            .push(ListenerEntry::new(id, once, callback));
        Ok(())
    }

    /// То же для глобального списка.
    pub(crate) fn register_global(
        &mut self,
        callback: GlobalCallback<N, P>,
        once: bool,
        id: ListenerId,
        limit: usize,
    ) -> Result<(), LimitExceeded> {
        if limit != 0 && self.global.len() >= limit {
            return Err(LimitExceeded { limit });
        }
        self.global
            .push(GlobalListenerEntry::new(id, once, callback));
        Ok(())
    }

    /// Снимает регистрацию по токену, где бы она ни находилась.
    ///
    /// # Возвращает
    /// - `true`, если запись была найдена и удалена.
    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        let mut removed = false;
        self.by_name.retain(|_, list| {
            let before = list.len();
            list.retain(|entry| entry.id != id);
            removed |= list.len() != before;
            !list.is_empty()
        });

        let before = self.global.len();
        self.global.retain(|entry| entry.id != id);
        removed || self.global.len() != before
    }

    /// Удаляет весь список слушателей имени `name`.
    ///
    /// Если имени нет — спокойно ничего не делает.
    pub(crate) fn remove_name(&mut self, name: &N) {
        self.by_name.remove(name);
    }

    /// Опустошает обе стороны реестра.
    pub(crate) fn clear(&mut self) {
        self.by_name.clear();
        self.global.clear();
    }

    /// Снимок списка имени `name` для одного прохода диспетчера.
    pub(crate) fn snapshot(&self, name: &N) -> Vec<Arc<ListenerEntry<P>>> {
        self.by_name.get(name).cloned().unwrap_or_default()
    }

    /// Снимок глобального списка.
    pub(crate) fn snapshot_global(&self) -> Vec<Arc<GlobalListenerEntry<N, P>>> {
        self.global.clone()
    }

    /// Удаляет конкретную запись имени `name` после one-shot вызова.
    pub(crate) fn remove_entry(&mut self, name: &N, id: ListenerId) {
        if let Some(list) = self.by_name.get_mut(name) {
            list.retain(|entry| entry.id != id);
            if list.is_empty() {
                self.by_name.remove(name);
            }
        }
    }

    /// Удаляет конкретную глобальную запись после one-shot вызова.
    pub(crate) fn remove_global_entry(&mut self, id: ListenerId) {
        self.global.retain(|entry| entry.id != id);
    }

    pub(crate) fn count(&self, name: &N) -> usize {
        self.by_name.get(name).map_or(0, Vec::len)
    }

    pub(crate) fn global_count(&self) -> usize {
        self.global.len()
    }
}
